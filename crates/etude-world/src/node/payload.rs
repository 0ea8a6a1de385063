use crate::context::ProcessContext;
use crate::params::VoiceParameters;
use crate::port::PortType;
use crate::vocoder::{AperiodicitySettings, F0Settings, SpectrumSettings, VocoderBackend};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AudioInputNode {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioInputNode {
    pub(super) fn new(samples: Arc<[f32]>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::InvalidArgument(
                "audio input sample_rate must be positive".into(),
            ));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub(super) fn execute(&self, ctx: &ProcessContext) -> Result<()> {
        if self.samples.is_empty() {
            let input = ctx.input_audio().ok_or(Error::NotReady("input audio"))?;
            ctx.publish_input(input.samples, input.sample_rate)
        } else {
            ctx.publish_input(Arc::clone(&self.samples), self.sample_rate)
        }
    }
}

#[derive(Debug, Clone)]
pub struct F0Node {
    settings: F0Settings,
}

impl F0Node {
    pub(super) fn new(frame_period: f64, f0_floor: f64, f0_ceil: f64) -> Result<Self> {
        if !(frame_period > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "frame_period {frame_period} must be positive"
            )));
        }
        if !(f0_floor > 0.0) || !(f0_ceil > f0_floor) {
            return Err(Error::InvalidArgument(format!(
                "F0 range {f0_floor}-{f0_ceil} Hz is empty or inverted"
            )));
        }
        Ok(Self {
            settings: F0Settings {
                frame_period,
                f0_floor,
                f0_ceil,
            },
        })
    }

    pub fn settings(&self) -> &F0Settings {
        &self.settings
    }

    pub(super) fn execute(&self, ctx: &ProcessContext, backend: &dyn VocoderBackend) -> Result<()> {
        let input = ctx.input_audio().ok_or(Error::NotReady("input audio"))?;
        let track = backend.estimate_f0(&input.samples, input.sample_rate, &self.settings)?;
        ctx.store_f0(track, self.settings.frame_period)
    }
}

#[derive(Debug, Clone)]
pub struct SpectrumNode {
    fft_size: usize,
    q1: f64,
    f0_ready: bool,
}

impl SpectrumNode {
    pub(super) fn new(fft_size: usize, q1: f64) -> Result<Self> {
        if fft_size < 2 {
            return Err(Error::InvalidArgument(format!(
                "spectrum fft_size {fft_size} too small"
            )));
        }
        if !q1.is_finite() {
            return Err(Error::InvalidArgument("spectrum q1 must be finite".into()));
        }
        Ok(Self {
            fft_size,
            q1,
            f0_ready: false,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn q1(&self) -> f64 {
        self.q1
    }

    pub(super) fn set_f0_ready(&mut self, ready: bool) {
        self.f0_ready = ready;
    }

    pub(super) fn execute(&self, ctx: &ProcessContext, backend: &dyn VocoderBackend) -> Result<()> {
        let input = ctx.input_audio().ok_or(Error::NotReady("input audio"))?;
        let (f0, frame_period) = guiding_f0(ctx, self.f0_ready);
        let settings = SpectrumSettings {
            frame_period,
            fft_size: self.fft_size,
            q1: self.q1,
        };
        let spectrogram =
            backend.estimate_spectrum(&input.samples, input.sample_rate, f0.as_deref(), &settings)?;
        ctx.store_spectrogram(spectrogram, self.fft_size)
    }
}

#[derive(Debug, Clone)]
pub struct AperiodicityNode {
    fft_size: usize,
    threshold: f64,
    f0_ready: bool,
}

impl AperiodicityNode {
    pub(super) fn new(fft_size: usize, threshold: f64) -> Result<Self> {
        if fft_size < 2 {
            return Err(Error::InvalidArgument(format!(
                "aperiodicity fft_size {fft_size} too small"
            )));
        }
        if !(threshold > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "aperiodicity threshold {threshold} must be positive"
            )));
        }
        Ok(Self {
            fft_size,
            threshold,
            f0_ready: false,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub(super) fn set_f0_ready(&mut self, ready: bool) {
        self.f0_ready = ready;
    }

    pub(super) fn execute(&self, ctx: &ProcessContext, backend: &dyn VocoderBackend) -> Result<()> {
        let input = ctx.input_audio().ok_or(Error::NotReady("input audio"))?;
        let (f0, frame_period) = guiding_f0(ctx, self.f0_ready);
        let settings = AperiodicitySettings {
            frame_period,
            fft_size: self.fft_size,
            threshold: self.threshold,
        };
        let aperiodicity = backend.estimate_aperiodicity(
            &input.samples,
            input.sample_rate,
            f0.as_deref(),
            &settings,
        )?;
        ctx.store_aperiodicity(aperiodicity)
    }
}

/// F0 contour and frame period for an analysis node.
///
/// Only a finished producer on the node's F0 input is read. Without one the
/// node runs on the configured frame period, whatever else shares its group.
fn guiding_f0(ctx: &ProcessContext, f0_ready: bool) -> (Option<Vec<f64>>, f64) {
    if f0_ready {
        (ctx.f0(), ctx.analysis_frame_period())
    } else {
        (None, ctx.frame_period())
    }
}

/// Joins F0, spectrum and aperiodicity into one parameter bundle.
///
/// Execution is gated on all three upstream producers having finished.
#[derive(Debug, Clone, Default)]
pub struct MergeNode {
    f0_ready: bool,
    spectrum_ready: bool,
    aperiodicity_ready: bool,
    merged_frames: usize,
}

impl MergeNode {
    pub fn mark_ready(&mut self, port_type: PortType) {
        match port_type {
            PortType::F0 => self.f0_ready = true,
            PortType::Spectrum => self.spectrum_ready = true,
            PortType::Aperiodicity => self.aperiodicity_ready = true,
            PortType::Parameters => {
                self.f0_ready = true;
                self.spectrum_ready = true;
                self.aperiodicity_ready = true;
            }
            PortType::Audio | PortType::Control => {}
        }
    }

    pub fn is_ready(&self) -> bool {
        self.f0_ready && self.spectrum_ready && self.aperiodicity_ready
    }

    /// Frames available when the merge last ran.
    pub fn merged_frames(&self) -> usize {
        self.merged_frames
    }

    pub(super) fn reset(&mut self) {
        *self = Self::default();
    }

    pub(super) fn execute(&mut self, ctx: &ProcessContext) -> Result<()> {
        if !self.f0_ready {
            return Err(Error::NotReady("f0"));
        }
        if !self.spectrum_ready {
            return Err(Error::NotReady("spectrum"));
        }
        if !self.aperiodicity_ready {
            return Err(Error::NotReady("aperiodicity"));
        }
        self.merged_frames = ctx.read_world(|world| {
            world
                .f0
                .len()
                .min(world.spectrogram.len())
                .min(world.aperiodicity.len())
        });
        Ok(())
    }
}

/// Retargets the analysed F0 contour from the voice parameters.
#[derive(Debug, Clone, Default)]
pub struct UtauMappingNode;

impl UtauMappingNode {
    pub(super) fn execute(&self, ctx: &ProcessContext) -> Result<()> {
        let voice = ctx.voice();
        ctx.update_world(|world| {
            if !world.has_f0() {
                return Err(Error::NotReady("f0"));
            }
            map_pitch(&mut world.f0, &voice);
            Ok(())
        })
    }
}

/// Apply target pitch, modulation and pitch bend to the voiced frames of `f0`.
pub(crate) fn map_pitch(f0: &mut [f64], voice: &VoiceParameters) {
    let voiced: Vec<f64> = f0.iter().copied().filter(|&hz| hz > 0.0).collect();
    if voiced.is_empty() {
        return;
    }
    let mean = voiced.iter().sum::<f64>() / voiced.len() as f64;
    let target = f64::from(voice.target_pitch);
    let modulation = f64::from(voice.modulation);
    let frames = f0.len();

    for (frame, hz) in f0.iter_mut().enumerate() {
        if *hz <= 0.0 {
            continue;
        }
        let base = if target > 0.0 {
            target * (*hz / mean).powf(modulation)
        } else {
            *hz
        };
        let cents = bend_at(&voice.pitch_bend, frame, frames);
        *hz = base * 2f64.powf(cents / 1200.0);
    }
}

/// Pitch bend in cents at `frame`, with the curve stretched over `frames`.
fn bend_at(curve: &[f32], frame: usize, frames: usize) -> f64 {
    match curve.len() {
        0 => 0.0,
        1 => f64::from(curve[0]),
        len => {
            let position = if frames > 1 {
                frame as f64 * (len - 1) as f64 / (frames - 1) as f64
            } else {
                0.0
            };
            let lower = position.floor() as usize;
            let upper = (lower + 1).min(len - 1);
            let t = position - lower as f64;
            f64::from(curve[lower]) * (1.0 - t) + f64::from(curve[upper]) * t
        }
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisNode {
    sample_rate: u32,
    frame_period: f64,
}

impl SynthesisNode {
    pub(super) fn new(sample_rate: u32, frame_period: f64) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::InvalidArgument(
                "synthesis sample_rate must be positive".into(),
            ));
        }
        if !(frame_period > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "synthesis frame_period {frame_period} must be positive"
            )));
        }
        Ok(Self {
            sample_rate,
            frame_period,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_period(&self) -> f64 {
        self.frame_period
    }

    pub(super) fn execute(&self, ctx: &ProcessContext, backend: &dyn VocoderBackend) -> Result<()> {
        let mut audio = ctx.read_world(|world| {
            if !world.has_f0() {
                return Err(Error::NotReady("f0"));
            }
            if !world.has_spectrogram() {
                return Err(Error::NotReady("spectrum"));
            }
            if world.frame_period > 0.0 {
                backend.synthesize(world, self.sample_rate)
            } else {
                let mut framed = world.clone();
                framed.frame_period = self.frame_period;
                backend.synthesize(&framed, self.sample_rate)
            }
        })?;
        let gain = ctx.voice().volume;
        if gain != 1.0 {
            audio.iter_mut().for_each(|s| *s *= gain);
        }
        ctx.store_output(audio, self.sample_rate)
    }
}

/// Collects the synthesized audio and optionally writes it to a WAV file.
#[derive(Debug, Clone, Default)]
pub struct AudioOutputNode {
    path: Option<PathBuf>,
    buffer: Vec<f32>,
    sample_rate: u32,
}

impl AudioOutputNode {
    pub(super) fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn buffer(&self) -> &[f32] {
        &self.buffer
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub(super) fn clear(&mut self) {
        self.buffer.clear();
        self.sample_rate = 0;
    }

    pub(super) fn execute(&mut self, ctx: &ProcessContext) -> Result<()> {
        let output = ctx
            .output_audio()
            .ok_or(Error::NotReady("synthesized audio"))?;
        self.buffer.clear();
        self.buffer.extend_from_slice(&output.samples);
        self.sample_rate = output.sample_rate;
        if let Some(path) = &self.path {
            write_wav(path, &self.buffer, self.sample_rate, ctx.voice().bit_depth)?;
            tracing::debug!(path = %path.display(), samples = self.buffer.len(), "wrote output");
        }
        Ok(())
    }
}

fn write_wav(path: &Path, samples: &[f32], sample_rate: u32, bit_depth: u16) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: bit_depth,
        sample_format: if bit_depth == 32 {
            hound::SampleFormat::Float
        } else {
            hound::SampleFormat::Int
        },
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    if bit_depth == 32 {
        for &sample in samples {
            writer.write_sample(sample)?;
        }
    } else {
        let scale = ((1i64 << (bit_depth - 1)) - 1) as f32;
        for &sample in samples {
            writer.write_sample((sample.clamp(-1.0, 1.0) * scale).round() as i32)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Behaviour of a [`NodeType::Custom`](super::NodeType::Custom) node.
///
/// Processors are shared between graph snapshots, so state lives behind
/// interior mutability.
pub trait NodeProcessor: Send + Sync {
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn process(&self, ctx: &ProcessContext) -> Result<()>;

    fn cleanup(&self) {}
}

#[derive(Clone)]
pub struct CustomNode {
    label: String,
    processor: Arc<dyn NodeProcessor>,
}

impl CustomNode {
    pub(super) fn new(label: String, processor: Arc<dyn NodeProcessor>) -> Self {
        Self { label, processor }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn processor(&self) -> &Arc<dyn NodeProcessor> {
        &self.processor
    }
}

impl std::fmt::Debug for CustomNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomNode")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
