//! Voice (UTAU) and WORLD analysis parameters.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-note rendering parameters supplied by a UTAU-style host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceParameters {
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,

    /// Target pitch in Hz. `0.0` keeps the analysed pitch.
    pub target_pitch: f32,
    /// 0.0-1.0
    pub velocity: f32,
    /// Output gain, 0.0-1.0.
    pub volume: f32,
    /// How much of the analysed pitch contour survives retargeting, 0.0-1.0.
    pub modulation: f32,
    /// Pitch bend curve in cents, stretched over the whole note.
    pub pitch_bend: Vec<f32>,

    pub consonant_velocity: f32,
    /// Milliseconds.
    pub pre_utterance: f32,
    /// Milliseconds.
    pub overlap: f32,
    /// Milliseconds.
    pub start_point: f32,

    pub sample_rate: u32,
    pub bit_depth: u16,

    pub enable_cache: bool,
    pub enable_optimization: bool,
    pub verbose: bool,
}

impl Default for VoiceParameters {
    fn default() -> Self {
        Self {
            input_path: None,
            output_path: None,
            target_pitch: 440.0,
            velocity: 1.0,
            volume: 1.0,
            modulation: 0.0,
            pitch_bend: Vec::new(),
            consonant_velocity: 1.0,
            pre_utterance: 0.0,
            overlap: 0.0,
            start_point: 0.0,
            sample_rate: 44100,
            bit_depth: 16,
            enable_cache: true,
            enable_optimization: true,
            verbose: false,
        }
    }
}

impl VoiceParameters {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidArgument("sample_rate must be positive".into()));
        }
        if !matches!(self.bit_depth, 16 | 24 | 32) {
            return Err(Error::InvalidArgument(format!(
                "bit_depth {} not supported (16, 24 or 32)",
                self.bit_depth
            )));
        }
        if !self.target_pitch.is_finite() || self.target_pitch < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "target_pitch {} must be a non-negative frequency",
                self.target_pitch
            )));
        }
        for (name, value) in [
            ("velocity", self.velocity),
            ("volume", self.volume),
            ("modulation", self.modulation),
            ("consonant_velocity", self.consonant_velocity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidArgument(format!(
                    "{name} {value} out of range (0.0-1.0)"
                )));
            }
        }
        if self.pitch_bend.iter().any(|c| !c.is_finite()) {
            return Err(Error::InvalidArgument(
                "pitch_bend contains non-finite values".into(),
            ));
        }
        Ok(())
    }
}

/// WORLD analysis results, filled in progressively while a graph runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldParameters {
    pub sample_rate: u32,
    pub audio_length: usize,
    /// Milliseconds between analysis frames.
    pub frame_period: f64,
    pub fft_size: usize,

    pub f0: Vec<f64>,
    /// Frame times in seconds, same length as `f0`.
    pub time_axis: Vec<f64>,
    /// One power spectrum (`fft_size / 2 + 1` bins) per frame.
    pub spectrogram: Vec<Vec<f64>>,
    /// One band aperiodicity row per frame, same shape as `spectrogram`.
    pub aperiodicity: Vec<Vec<f64>>,
}

impl WorldParameters {
    pub fn f0_length(&self) -> usize {
        self.f0.len()
    }

    pub fn has_f0(&self) -> bool {
        !self.f0.is_empty()
    }

    pub fn has_spectrogram(&self) -> bool {
        !self.spectrogram.is_empty()
    }

    pub fn has_aperiodicity(&self) -> bool {
        !self.aperiodicity.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.has_f0() && self.has_spectrogram() && self.has_aperiodicity()
    }

    /// Bytes held by the analysis arrays.
    pub fn memory_footprint(&self) -> usize {
        let rows = |m: &Vec<Vec<f64>>| m.iter().map(Vec::len).sum::<usize>();
        let values = self.f0.len()
            + self.time_axis.len()
            + rows(&self.spectrogram)
            + rows(&self.aperiodicity);
        values * std::mem::size_of::<f64>()
    }

    /// Number of analysis frames for `audio_length` samples.
    pub fn frame_count(audio_length: usize, sample_rate: u32, frame_period_ms: f64) -> usize {
        if sample_rate == 0 || frame_period_ms <= 0.0 {
            return 0;
        }
        let duration_ms = audio_length as f64 * 1000.0 / f64::from(sample_rate);
        (duration_ms / frame_period_ms) as usize + 1
    }
}
