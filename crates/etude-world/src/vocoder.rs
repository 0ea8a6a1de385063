//! Vocoder backends invoked by the analysis and synthesis nodes.
//!
//! The graph only decides *when* each routine runs. The numerical work sits
//! behind [`VocoderBackend`] so a full WORLD implementation can be plugged in.
//! [`ReferenceVocoder`] is a small self-contained backend: autocorrelation
//! F0, Hann-windowed FFT power spectra, spectral-flatness aperiodicity and a
//! harmonic-plus-noise resynthesis.

use crate::params::WorldParameters;
use crate::{Error, Result};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f64::consts::PI;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct F0Settings {
    /// Milliseconds.
    pub frame_period: f64,
    pub f0_floor: f64,
    pub f0_ceil: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumSettings {
    pub frame_period: f64,
    pub fft_size: usize,
    pub q1: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AperiodicitySettings {
    pub frame_period: f64,
    pub fft_size: usize,
    pub threshold: f64,
}

/// F0 contour with its frame times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct F0Track {
    pub f0: Vec<f64>,
    pub time_axis: Vec<f64>,
}

/// Numerical routines behind the WORLD nodes.
pub trait VocoderBackend: Send + Sync {
    fn name(&self) -> &str;

    fn estimate_f0(&self, audio: &[f32], sample_rate: u32, settings: &F0Settings)
        -> Result<F0Track>;

    /// `f0` is `None` when the spectrum runs in parallel with F0 extraction.
    fn estimate_spectrum(
        &self,
        audio: &[f32],
        sample_rate: u32,
        f0: Option<&[f64]>,
        settings: &SpectrumSettings,
    ) -> Result<Vec<Vec<f64>>>;

    fn estimate_aperiodicity(
        &self,
        audio: &[f32],
        sample_rate: u32,
        f0: Option<&[f64]>,
        settings: &AperiodicitySettings,
    ) -> Result<Vec<Vec<f64>>>;

    fn synthesize(&self, world: &WorldParameters, sample_rate: u32) -> Result<Vec<f32>>;
}

/// Backend handle shared by every node of a graph.
pub type SharedBackend = Arc<dyn VocoderBackend>;

const VOICING_THRESHOLD: f64 = 0.5;
const MAX_HARMONICS: usize = 40;
const POWER_FLOOR: f64 = 1e-12;

/// Self-contained backend used when no external vocoder is supplied.
#[derive(Debug, Clone, Default)]
pub struct ReferenceVocoder {
    seed: u64,
}

impl ReferenceVocoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed for the noise excitation.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    pub fn shared() -> SharedBackend {
        Arc::new(Self::new())
    }
}

impl VocoderBackend for ReferenceVocoder {
    fn name(&self) -> &str {
        "reference"
    }

    fn estimate_f0(
        &self,
        audio: &[f32],
        sample_rate: u32,
        settings: &F0Settings,
    ) -> Result<F0Track> {
        check_audio(audio, sample_rate)?;
        let sr = f64::from(sample_rate);
        let frames = WorldParameters::frame_count(audio.len(), sample_rate, settings.frame_period);
        let min_lag = ((sr / settings.f0_ceil).floor() as usize).max(1);
        let max_lag = ((sr / settings.f0_floor).ceil() as usize).max(min_lag + 1);

        let mut track = F0Track {
            f0: Vec::with_capacity(frames),
            time_axis: Vec::with_capacity(frames),
        };
        for frame in 0..frames {
            let time = frame as f64 * settings.frame_period / 1000.0;
            let center = (time * sr).round() as usize;
            let start = center.saturating_sub(max_lag).min(audio.len());
            let end = (start + 2 * max_lag).min(audio.len());
            track.time_axis.push(time);
            track
                .f0
                .push(autocorrelation_f0(&audio[start..end], sr, min_lag, max_lag));
        }
        Ok(track)
    }

    fn estimate_spectrum(
        &self,
        audio: &[f32],
        sample_rate: u32,
        _f0: Option<&[f64]>,
        settings: &SpectrumSettings,
    ) -> Result<Vec<Vec<f64>>> {
        check_audio(audio, sample_rate)?;
        power_spectrogram(audio, sample_rate, settings.frame_period, settings.fft_size)
    }

    fn estimate_aperiodicity(
        &self,
        audio: &[f32],
        sample_rate: u32,
        f0: Option<&[f64]>,
        settings: &AperiodicitySettings,
    ) -> Result<Vec<Vec<f64>>> {
        check_audio(audio, sample_rate)?;
        let spectra =
            power_spectrogram(audio, sample_rate, settings.frame_period, settings.fft_size)?;
        Ok(spectra
            .iter()
            .enumerate()
            .map(|(frame, power)| {
                let unvoiced = f0
                    .and_then(|f0| f0.get(frame))
                    .is_some_and(|&hz| hz <= 0.0);
                let flatness = spectral_flatness(power);
                let ap = if unvoiced || flatness > settings.threshold {
                    0.999
                } else {
                    flatness.clamp(0.001, 0.999)
                };
                vec![ap; power.len()]
            })
            .collect())
    }

    fn synthesize(&self, world: &WorldParameters, sample_rate: u32) -> Result<Vec<f32>> {
        if sample_rate == 0 {
            return Err(Error::InvalidArgument("sample_rate must be positive".into()));
        }
        let frames = world.f0.len().min(world.spectrogram.len());
        if frames == 0 || world.frame_period <= 0.0 {
            return Err(Error::InvalidArgument(
                "synthesis needs at least one F0 and spectrum frame".into(),
            ));
        }
        let bins = world.spectrogram[0].len();
        if bins < 2 {
            return Err(Error::InvalidArgument("spectrum has fewer than two bins".into()));
        }
        let fft_size = (bins - 1) * 2;
        let sr = f64::from(sample_rate);
        let samples = if world.audio_length > 0 && world.sample_rate > 0 {
            (world.audio_length as f64 * sr / f64::from(world.sample_rate)).round() as usize
        } else if world.audio_length > 0 {
            world.audio_length
        } else {
            ((frames - 1) as f64 * world.frame_period / 1000.0 * sr) as usize + 1
        };

        let mut noise = NoiseSource::new(self.seed);
        let mut phase = 0.0f64;
        let mut out = Vec::with_capacity(samples);
        for n in 0..samples {
            let frame = ((n as f64 * 1000.0 / sr / world.frame_period).round() as usize)
                .min(frames - 1);
            let f0 = world.f0[frame];
            let power = &world.spectrogram[frame];
            let ap = world
                .aperiodicity
                .get(frame)
                .map(|row| row.iter().sum::<f64>() / row.len().max(1) as f64)
                .unwrap_or(0.001);
            let level = 4.0 * (power.iter().sum::<f64>() / bins as f64).sqrt() / fft_size as f64;

            let value = if f0 > 0.0 {
                phase = (phase + 2.0 * PI * f0 / sr) % (2.0 * PI);
                let mut harmonic = 0.0;
                for h in 1..=MAX_HARMONICS {
                    let freq = h as f64 * f0;
                    if freq >= sr / 2.0 {
                        break;
                    }
                    let bin = ((freq * fft_size as f64 / sr).round() as usize).min(bins - 1);
                    let amplitude = 4.0 * power[bin].sqrt() / fft_size as f64;
                    harmonic += amplitude * (h as f64 * phase).sin();
                }
                (1.0 - ap) * harmonic + ap * level * noise.next()
            } else {
                level * noise.next()
            };
            out.push(value as f32);
        }

        let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        if peak > 1.0 {
            let scale = 0.99 / peak;
            out.iter_mut().for_each(|s| *s *= scale);
        }
        Ok(out)
    }
}

fn check_audio(audio: &[f32], sample_rate: u32) -> Result<()> {
    if audio.is_empty() {
        return Err(Error::InvalidArgument("audio buffer is empty".into()));
    }
    if sample_rate == 0 {
        return Err(Error::InvalidArgument("sample_rate must be positive".into()));
    }
    Ok(())
}

/// F0 of one analysis window, or 0.0 when unvoiced.
fn autocorrelation_f0(window: &[f32], sr: f64, min_lag: usize, max_lag: usize) -> f64 {
    let energy: f64 = window.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
    if window.len() <= min_lag + 1 || energy < 1e-8 {
        return 0.0;
    }
    let max_lag = max_lag.min(window.len() - 1);

    let scores: Vec<(usize, f64)> = (min_lag..=max_lag)
        .map(|lag| {
            let (mut cross, mut head, mut tail) = (0.0, 0.0, 0.0);
            for n in 0..window.len() - lag {
                let a = f64::from(window[n]);
                let b = f64::from(window[n + lag]);
                cross += a * b;
                head += a * a;
                tail += b * b;
            }
            let norm = (head * tail).sqrt();
            (lag, if norm > 0.0 { cross / norm } else { 0.0 })
        })
        .collect();

    let best = scores.iter().fold(0.0f64, |m, &(_, r)| m.max(r));
    if best < VOICING_THRESHOLD {
        return 0.0;
    }
    // Shortest lag that is a local peak close to the best score, so octave
    // multiples of the period do not win.
    let pick = scores.iter().enumerate().find(|&(i, &(_, r))| {
        let left = if i > 0 { scores[i - 1].1 } else { f64::MIN };
        let right = scores.get(i + 1).map_or(f64::MIN, |s| s.1);
        r >= 0.95 * best && r >= left && r >= right
    });
    match pick {
        Some((_, &(lag, _))) => sr / lag as f64,
        None => 0.0,
    }
}

fn power_spectrogram(
    audio: &[f32],
    sample_rate: u32,
    frame_period: f64,
    fft_size: usize,
) -> Result<Vec<Vec<f64>>> {
    if fft_size < 2 {
        return Err(Error::InvalidArgument(format!("fft_size {fft_size} too small")));
    }
    let sr = f64::from(sample_rate);
    let frames = WorldParameters::frame_count(audio.len(), sample_rate, frame_period);
    let bins = fft_size / 2 + 1;
    let window: Vec<f64> = (0..fft_size)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / fft_size as f64).cos())
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(fft_size);
    let mut buffer = vec![Complex::new(0.0, 0.0); fft_size];

    let mut spectrogram = Vec::with_capacity(frames);
    for frame in 0..frames {
        let center = (frame as f64 * frame_period / 1000.0 * sr).round() as i64;
        let start = center - (fft_size / 2) as i64;
        for (n, slot) in buffer.iter_mut().enumerate() {
            let index = start + n as i64;
            let sample = usize::try_from(index)
                .ok()
                .and_then(|i| audio.get(i))
                .map_or(0.0, |&s| f64::from(s));
            *slot = Complex::new(sample * window[n], 0.0);
        }
        fft.process(&mut buffer);
        spectrogram.push(
            buffer[..bins]
                .iter()
                .map(|c| c.norm_sqr() + POWER_FLOOR)
                .collect(),
        );
    }
    Ok(spectrogram)
}

/// Geometric over arithmetic mean of a power spectrum, in `0.0..=1.0`.
fn spectral_flatness(power: &[f64]) -> f64 {
    if power.is_empty() {
        return 1.0;
    }
    let n = power.len() as f64;
    let log_mean = power.iter().map(|p| p.ln()).sum::<f64>() / n;
    let mean = power.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 1.0;
    }
    (log_mean.exp() / mean).clamp(0.0, 1.0)
}

/// xorshift64* white noise in `-1.0..1.0`.
struct NoiseSource {
    state: u64,
}

impl NoiseSource {
    fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    fn next(&mut self) -> f64 {
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        let bits = self.state.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11;
        bits as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
    }
}
