//! Audio device output using cpal
//!
//! Registers an [`AudioSource`] as the render callback of the default output
//! device. The callback only forwards the device's buffer to
//! [`AudioSource::render`]; all buffering and padding happens in the bridge.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error};

use emubridge_core::{AudioSource, ChannelLayout, MixerRequest, OutputSample};

/// Errors opening or starting the output device
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no audio output device available")]
    NoDevice,

    #[error("failed to get default output config: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported sample format: {0:?}")]
    UnsupportedFormat(cpal::SampleFormat),

    #[error("unsupported channel count: {0} (mono or stereo only)")]
    UnsupportedChannels(u16),

    #[error("failed to build audio stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to play audio stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
}

fn default_device() -> Result<(cpal::Device, cpal::SupportedStreamConfig), DeviceError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;
    let config = device.default_output_config()?;
    Ok((device, config))
}

/// Sample rate of the default output device
///
/// Start the session at this rate to avoid a retune on the first callback.
pub fn default_sample_rate() -> Result<u32, DeviceError> {
    let (_, config) = default_device()?;
    Ok(config.sample_rate().0)
}

/// A playing output stream pulling from an [`AudioSource`]
pub struct DeviceOutput {
    /// The cpal stream (kept alive for the duration)
    _stream: cpal::Stream,
    sample_rate: u32,
    layout: ChannelLayout,
}

impl DeviceOutput {
    /// Open the default output device and start pulling from `source`
    pub fn open(source: AudioSource) -> Result<Self, DeviceError> {
        let (device, config) = default_device()?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();
        let layout =
            ChannelLayout::from_channels(channels).ok_or(DeviceError::UnsupportedChannels(channels))?;
        let sample_format = config.sample_format();
        let stream_config: cpal::StreamConfig = config.into();

        let stream = match sample_format {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &stream_config, source, sample_rate, layout)?
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &stream_config, source, sample_rate, layout)?
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &stream_config, source, sample_rate, layout)?
            }
            other => return Err(DeviceError::UnsupportedFormat(other)),
        };

        stream.play()?;

        debug!(
            "Audio stream started: {} Hz, {:?}, {:?}",
            sample_rate, layout, sample_format
        );

        Ok(Self {
            _stream: stream,
            sample_rate,
            layout,
        })
    }

    /// Get the output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }
}

fn build_stream<S>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut source: AudioSource,
    sample_rate: u32,
    layout: ChannelLayout,
) -> Result<cpal::Stream, DeviceError>
where
    S: OutputSample + cpal::SizedSample,
{
    let channels = layout.channels();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [S], _: &cpal::OutputCallbackInfo| {
            let request = MixerRequest::new(data.len() / channels, sample_rate, layout);
            source.render(&request, data);
        },
        |err| error!("Audio stream error: {}", err),
        None,
    )?;
    Ok(stream)
}
