//! # Audio Input Module
//!
//! Turns a continuous mono sample stream into the fixed-size, timestamped
//! windows the pipeline analyses.
//!
//! ## Features
//! - [`WindowBuffer`]: accumulates device callbacks of any size and emits
//!   overlapping windows at a fixed hop
//! - [`AudioSource`]: the contract an input device fulfils for the engine
//! - `CpalSource` (feature `capture`): default microphone through CPAL,
//!   streaming windows over a crossbeam channel

use std::sync::Arc;

use crate::error::Result;

/// Samples per analysis window.
///
/// Large enough for two periods of the lowest string at 48 kHz while keeping
/// the O(n²) difference function cheap.
pub const BUFFER_SIZE: usize = 2048;

/// Default hop between windows (50% overlap).
pub const HOP_SIZE: usize = BUFFER_SIZE / 2;

/// Sample rate assumed when none is supplied.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// An immutable span of normalized mono samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioWindow {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    /// Time of the last sample, in milliseconds since the stream started.
    pub timestamp_ms: f64,
}

impl AudioWindow {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32, timestamp_ms: f64) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            timestamp_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Fixed-size rolling buffer feeding windows at a controlled cadence.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    window_size: usize,
    hop_size: usize,
    sample_rate: u32,
    buffer: Vec<f32>,
    /// Samples already dropped from the front of `buffer`.
    consumed: u64,
}

impl WindowBuffer {
    /// `hop_size` is clamped to `1..=window_size`.
    pub fn new(window_size: usize, hop_size: usize, sample_rate: u32) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            hop_size: hop_size.clamp(1, window_size),
            sample_rate,
            buffer: Vec::with_capacity(window_size * 2),
            consumed: 0,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples waiting for the next window.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Appends samples and hands every completed window to `emit`, in order.
    pub fn push_with(&mut self, data: &[f32], mut emit: impl FnMut(AudioWindow)) {
        // Append new data to our buffer.
        self.buffer.extend_from_slice(data);

        // While we have enough data for a full frame, process it.
        while self.buffer.len() >= self.window_size {
            let end_sample = self.consumed + self.window_size as u64;
            let timestamp_ms = end_sample as f64 * 1000.0 / self.sample_rate.max(1) as f64;
            emit(AudioWindow::new(
                &self.buffer[..self.window_size],
                self.sample_rate,
                timestamp_ms,
            ));

            // Advance by one hop; the overlap stays for the next window.
            self.buffer.drain(..self.hop_size);
            self.consumed += self.hop_size as u64;
        }
    }

    /// Convenience wrapper collecting the completed windows.
    pub fn push(&mut self, data: &[f32]) -> Vec<AudioWindow> {
        let mut windows = Vec::new();
        self.push_with(data, |window| windows.push(window));
        windows
    }

    /// Drops buffered samples and restarts the clock.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.consumed = 0;
    }
}

/// An audio input the engine can start from.
///
/// Opening acquires the device (and any permission) and reports the sample
/// rate the stream will run at. Failures must be reported as
/// [`TunerError::InputUnavailable`](crate::TunerError::InputUnavailable).
pub trait AudioSource {
    fn open(&mut self) -> Result<u32>;

    /// Releases the device. The default does nothing.
    fn close(&mut self) {}
}

#[cfg(feature = "capture")]
pub use capture::CpalSource;

#[cfg(feature = "capture")]
mod capture {
    use super::{AudioSource, AudioWindow, BUFFER_SIZE, DEFAULT_SAMPLE_RATE, HOP_SIZE, WindowBuffer};
    use crate::error::{InputFailure, Result, TunerError};
    use anyhow::{Context, anyhow};
    use cpal::SupportedStreamConfigRange;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use crossbeam_channel::Sender;
    use log::{error, info, warn};

    /// Default microphone through CPAL.
    ///
    /// Windows are sent with `try_send`; when the analysis side falls behind
    /// they are dropped rather than queued.
    pub struct CpalSource {
        sender: Sender<AudioWindow>,
        window_size: usize,
        hop_size: usize,
        target_rate: u32,
        stream: Option<cpal::Stream>,
    }

    impl CpalSource {
        pub fn new(sender: Sender<AudioWindow>) -> Self {
            Self {
                sender,
                window_size: BUFFER_SIZE,
                hop_size: HOP_SIZE,
                target_rate: DEFAULT_SAMPLE_RATE,
                stream: None,
            }
        }

        pub fn with_window(mut self, window_size: usize, hop_size: usize) -> Self {
            self.window_size = window_size;
            self.hop_size = hop_size;
            self
        }

        pub fn with_sample_rate(mut self, target_rate: u32) -> Self {
            self.target_rate = target_rate;
            self
        }

        fn start_stream(&self) -> anyhow::Result<(cpal::Stream, u32)> {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| anyhow!("No input device available"))?;

            info!("Using audio input device: {}", device.name()?);

            let configs = device.supported_input_configs()?.collect::<Vec<_>>();
            let supported_config = find_supported_config(configs, self.target_rate)
                .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

            let rate = self
                .target_rate
                .clamp(supported_config.min_sample_rate().0, supported_config.max_sample_rate().0);
            let config = supported_config.with_sample_rate(cpal::SampleRate(rate));
            let sample_rate = config.sample_rate().0;
            let channels = config.channels() as usize;
            let config: cpal::StreamConfig = config.into();

            info!("Selected sample rate: {} Hz ({} channel(s))", sample_rate, channels);

            let sender = self.sender.clone();
            let mut windows = WindowBuffer::new(self.window_size, self.hop_size, sample_rate);
            let mut mono = Vec::with_capacity(self.window_size);

            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        mono.clear();
                        mono.extend(
                            data.chunks(channels.max(1))
                                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                        );
                        windows.push_with(&mono, |window| {
                            // Ignore errors if the channel is full.
                            let _ = sender.try_send(window);
                        });
                    },
                    |err| error!("An error occurred on the audio stream: {}", err),
                    None,
                )
                .context("building input stream")?;

            stream.play().context("starting input stream")?;
            Ok((stream, sample_rate))
        }
    }

    impl AudioSource for CpalSource {
        fn open(&mut self) -> Result<u32> {
            match self.start_stream() {
                Ok((stream, sample_rate)) => {
                    self.stream = Some(stream);
                    Ok(sample_rate)
                }
                Err(e) => {
                    warn!("Audio capture failed: {:#}", e);
                    Err(TunerError::input_unavailable(classify(&e), format!("{:#}", e)))
                }
            }
        }

        fn close(&mut self) {
            if let Some(stream) = self.stream.take() {
                if let Err(e) = stream.pause() {
                    warn!("Error pausing stream: {}", e);
                }
            }
        }
    }

    fn classify(err: &anyhow::Error) -> InputFailure {
        let text = format!("{:#}", err).to_lowercase();
        if text.contains("no input device") || text.contains("device not available") {
            InputFailure::NoDevice
        } else if text.contains("permission") || text.contains("denied") {
            InputFailure::PermissionDenied
        } else if text.contains("format") || text.contains("not supported") {
            InputFailure::Unsupported
        } else {
            InputFailure::Other
        }
    }

    /// Picks the f32 configuration closest to `target_rate`, preferring mono.
    fn find_supported_config(
        configs: Vec<SupportedStreamConfigRange>,
        target_rate: u32,
    ) -> Option<SupportedStreamConfigRange> {
        configs
            .into_iter()
            .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
            .min_by_key(|c| {
                let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
                let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
                let in_range = c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0;
                let rate_cost = if in_range { 0 } else { min_diff.min(max_diff) };
                (c.channels() != 1, rate_cost)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_overlapping_windows_in_order() {
        let mut buffer = WindowBuffer::new(8, 4, 1000);
        let samples: Vec<f32> = (0..20).map(|i| i as f32).collect();

        let windows = buffer.push(&samples);
        assert_eq!(windows.len(), 4);
        assert_eq!(&windows[0].samples[..], &samples[0..8]);
        assert_eq!(&windows[1].samples[..], &samples[4..12]);
        assert_eq!(&windows[3].samples[..], &samples[12..20]);
        assert_eq!(buffer.pending(), 4);

        // Timestamps mark the last sample of each window.
        assert_eq!(windows[0].timestamp_ms, 8.0);
        assert_eq!(windows[1].timestamp_ms, 12.0);
    }

    #[test]
    fn small_callbacks_accumulate() {
        let mut buffer = WindowBuffer::new(BUFFER_SIZE, HOP_SIZE, DEFAULT_SAMPLE_RATE);
        let chunk = [0.25f32; 128];
        let mut count = 0;
        for _ in 0..31 {
            buffer.push_with(&chunk, |window| {
                assert_eq!(window.len(), BUFFER_SIZE);
                count += 1;
            });
        }
        // 31 * 128 = 3968 samples: windows end at 2048 and 3072.
        assert_eq!(count, 2);
    }

    #[test]
    fn reset_restarts_the_clock() {
        let mut buffer = WindowBuffer::new(4, 4, 1000);
        buffer.push(&[0.0; 6]);
        buffer.reset();
        assert_eq!(buffer.pending(), 0);
        let windows = buffer.push(&[0.0; 4]);
        assert_eq!(windows[0].timestamp_ms, 4.0);
    }

    #[test]
    fn hop_is_clamped_to_the_window() {
        let buffer = WindowBuffer::new(16, 0, 1000);
        assert_eq!(buffer.hop_size(), 1);
        let buffer = WindowBuffer::new(16, 64, 1000);
        assert_eq!(buffer.hop_size(), 16);
    }
}
