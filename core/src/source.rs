//! Audio source adapter
//!
//! The host mixer's side of the bridge. [`AudioSource::render`] is called on
//! the real-time audio thread and must always return promptly: it never
//! allocates, locks or waits. Whatever the ring cannot supply is padded,
//! with a short fade from the last real frame so starvation does not click.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use crate::config::{AudioConfig, IdleAudio};
use crate::frame::{AudioFrame, ChannelLayout, MixerRequest, OutputSample};
use crate::ring::FrameConsumer;
use crate::shared::{SessionShared, SessionStatus};
use crate::stats::BridgeStats;

const NOISE_SEED: u64 = 0x6e6f_6973_6521;

/// Deterministic white noise generator for the idle output
#[derive(Debug, Clone)]
pub struct WhiteNoise {
    rng: Pcg32,
    volume: f32,
}

impl WhiteNoise {
    pub fn new(volume: f32) -> Self {
        Self::with_seed(NOISE_SEED, volume)
    }

    pub fn with_seed(seed: u64, volume: f32) -> Self {
        Self {
            rng: Pcg32::seed_from_u64(seed),
            volume: volume.clamp(0.0, 1.0),
        }
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        self.rng.random_range(-1.0f32..1.0) * self.volume
    }
}

#[inline]
fn write_frame<S: OutputSample>(out: &mut [S], index: usize, frame: AudioFrame, layout: ChannelLayout) {
    match layout {
        ChannelLayout::Mono => out[index] = S::from_f32(frame.downmix()),
        ChannelLayout::Stereo => {
            out[index * 2] = S::from_f32(frame.left);
            out[index * 2 + 1] = S::from_f32(frame.right);
        }
    }
}

/// Pull-side adapter handed to the host mixer
///
/// Obtained once per session from
/// [`BridgeSession::take_audio_source`](crate::BridgeSession::take_audio_source).
/// It may outlive the session, in which case it plays idle audio.
pub struct AudioSource {
    consumer: FrameConsumer,
    shared: Arc<SessionShared>,
    /// Fixed read buffer; requests larger than this are served in chunks
    scratch: Vec<AudioFrame>,
    fade_frames: usize,
    /// Fade frames left before padding turns into silence
    fade_remaining: usize,
    last_frame: AudioFrame,
    idle: IdleAudio,
    noise: WhiteNoise,
    /// Rate of the last request seen
    sample_rate: u32,
}

impl AudioSource {
    pub(crate) fn new(consumer: FrameConsumer, shared: Arc<SessionShared>, config: &AudioConfig) -> Self {
        Self {
            consumer,
            shared,
            scratch: vec![AudioFrame::SILENCE; config.max_render_frames.max(1)],
            fade_frames: config.fade_frames,
            fade_remaining: 0,
            last_frame: AudioFrame::SILENCE,
            idle: config.idle,
            noise: WhiteNoise::new(config.noise_volume),
            sample_rate: config.output_sample_rate,
        }
    }

    /// Fill `out` with `request.frame_count` interleaved frames
    ///
    /// Returns the number of frames written, which is `frame_count` unless
    /// `out` is too short to hold them. Samples past the written frames are
    /// set to silence.
    pub fn render<S: OutputSample>(&mut self, request: &MixerRequest, out: &mut [S]) -> usize {
        let channels = request.layout.channels();
        let frames = request.frame_count.min(out.len() / channels);

        self.note_rate(request.sample_rate);
        if self.consumer.apply_discard() > 0 {
            // The stream was cut; never fade from audio that was thrown away
            self.last_frame = AudioFrame::SILENCE;
            self.fade_remaining = 0;
        }

        match self.shared.status() {
            SessionStatus::Running => self.render_stream(frames, request.layout, out, true),
            SessionStatus::Paused => self.render_stream(frames, request.layout, out, false),
            SessionStatus::PoweredOff | SessionStatus::Stopped | SessionStatus::Faulted => {
                self.render_idle(frames, request.layout, out)
            }
        }

        for sample in &mut out[frames * channels..] {
            *sample = S::SILENCE;
        }

        // Space just opened up in the ring
        self.shared.wake.notify_one();
        frames
    }

    fn note_rate(&mut self, rate: u32) {
        if rate != 0 && rate != self.sample_rate {
            self.sample_rate = rate;
            self.shared.requested_rate.store(rate, Ordering::Release);
        }
    }

    fn render_stream<S: OutputSample>(
        &mut self,
        frames: usize,
        layout: ChannelLayout,
        out: &mut [S],
        count_underruns: bool,
    ) {
        let mut done = 0;
        while done < frames {
            let want = (frames - done).min(self.scratch.len());
            let got = self.consumer.read(&mut self.scratch[..want]);
            for (i, &frame) in self.scratch[..got].iter().enumerate() {
                write_frame(out, done + i, frame, layout);
            }
            if got > 0 {
                self.last_frame = self.scratch[got - 1];
                self.fade_remaining = self.fade_frames;
            }
            done += got;
            // Once starved, stay starved for the rest of this call
            if got < want {
                break;
            }
        }

        self.shared.counters.add_rendered(done);
        if done == frames {
            return;
        }

        if count_underruns {
            self.shared.counters.record_underrun(frames - done);
        }
        for i in done..frames {
            let frame = self.next_fade_frame();
            write_frame(out, i, frame, layout);
        }
    }

    fn next_fade_frame(&mut self) -> AudioFrame {
        if self.fade_remaining == 0 {
            self.last_frame = AudioFrame::SILENCE;
            return AudioFrame::SILENCE;
        }
        self.fade_remaining -= 1;
        let gain = self.fade_remaining as f32 / self.fade_frames as f32;
        self.last_frame.scale(gain)
    }

    fn render_idle<S: OutputSample>(&mut self, frames: usize, layout: ChannelLayout, out: &mut [S]) {
        self.last_frame = AudioFrame::SILENCE;
        self.fade_remaining = 0;
        for i in 0..frames {
            let frame = match self.idle {
                IdleAudio::Silence => AudioFrame::SILENCE,
                IdleAudio::WhiteNoise => AudioFrame::mono(self.noise.next_sample()),
            };
            write_frame(out, i, frame, layout);
        }
    }

    /// Rate of the most recent render request
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames currently queued in the ring
    pub fn buffered_frames(&self) -> usize {
        self.consumer.available()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    pub fn stats(&self) -> BridgeStats {
        self.shared.counters.snapshot()
    }
}
