//! Data shared by the nodes of one run.

use crate::config::ExecutionConfig;
use crate::params::{VoiceParameters, WorldParameters};
use crate::vocoder::{F0Track, SharedBackend};
use crate::{Error, Result};
use etude_core::compat::RwLock;
use etude_core::MemoryPool;
use std::any::Any;
use std::sync::Arc;

/// Opaque value stored in a shared-data slot.
pub type SharedData = Arc<dyn Any + Send + Sync>;

/// Mono audio with its sample rate.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

/// What every node of a run reads from and writes to.
///
/// Nodes of one parallel group run concurrently, so everything here sits
/// behind a lock. Result arrays are charged to the run arena before they are
/// stored; an exhausted arena fails the storing node with `OutOfMemory`.
pub struct ProcessContext {
    voice: RwLock<VoiceParameters>,
    frame_period: f64,
    backend: SharedBackend,
    pool: MemoryPool,
    input: RwLock<Option<AudioBuffer>>,
    world: RwLock<WorldParameters>,
    output: RwLock<Option<AudioBuffer>>,
    shared: RwLock<Vec<Option<SharedData>>>,
}

impl ProcessContext {
    pub fn new(
        voice: VoiceParameters,
        backend: SharedBackend,
        config: &ExecutionConfig,
    ) -> Result<Self> {
        voice.validate()?;
        config.validate()?;
        let pool = MemoryPool::new(config.memory_pool_size)?;
        let ctx = Self {
            voice: RwLock::new(voice),
            frame_period: config.frame_period,
            backend,
            pool,
            input: RwLock::new(None),
            world: RwLock::new(WorldParameters::default()),
            output: RwLock::new(None),
            shared: RwLock::new(Vec::new()),
        };
        ctx.allocate_shared_data(config.shared_data_slots)?;
        Ok(ctx)
    }

    pub fn voice(&self) -> VoiceParameters {
        self.voice.read().clone()
    }

    pub(crate) fn set_voice(&self, voice: VoiceParameters) -> Result<()> {
        voice.validate()?;
        *self.voice.write() = voice;
        Ok(())
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    /// Configured analysis frame period in milliseconds.
    pub fn frame_period(&self) -> f64 {
        self.frame_period
    }

    /// Frame period the analysis nodes should use: the one recorded by F0
    /// extraction when it already ran, otherwise the configured one.
    pub fn analysis_frame_period(&self) -> f64 {
        let recorded = self.world.read().frame_period;
        if recorded > 0.0 {
            recorded
        } else {
            self.frame_period
        }
    }

    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }

    pub fn input_audio(&self) -> Option<AudioBuffer> {
        self.input.read().clone()
    }

    /// Audio a source node reads when it carries no samples of its own.
    pub fn set_input_audio(&self, samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Result<()> {
        let samples = samples.into();
        if samples.is_empty() || sample_rate == 0 {
            return Err(Error::InvalidArgument(
                "input audio needs samples and a positive sample rate".into(),
            ));
        }
        *self.input.write() = Some(AudioBuffer {
            samples,
            sample_rate,
        });
        Ok(())
    }

    /// Make `samples` the run's input and record its shape in the WORLD parameters.
    pub fn publish_input(&self, samples: Arc<[f32]>, sample_rate: u32) -> Result<()> {
        if samples.is_empty() || sample_rate == 0 {
            return Err(Error::InvalidArgument(
                "input audio needs samples and a positive sample rate".into(),
            ));
        }
        {
            let mut world = self.world.write();
            world.sample_rate = sample_rate;
            world.audio_length = samples.len();
        }
        *self.input.write() = Some(AudioBuffer {
            samples,
            sample_rate,
        });
        Ok(())
    }

    pub fn read_world<R>(&self, f: impl FnOnce(&WorldParameters) -> R) -> R {
        f(&self.world.read())
    }

    pub fn update_world<R>(&self, f: impl FnOnce(&mut WorldParameters) -> R) -> R {
        f(&mut self.world.write())
    }

    pub fn world_snapshot(&self) -> WorldParameters {
        self.world.read().clone()
    }

    /// Copy of the F0 contour, if extracted.
    pub fn f0(&self) -> Option<Vec<f64>> {
        let world = self.world.read();
        world.has_f0().then(|| world.f0.clone())
    }

    pub fn store_f0(&self, track: F0Track, frame_period: f64) -> Result<()> {
        self.charge((track.f0.len() + track.time_axis.len()) * std::mem::size_of::<f64>())?;
        let mut world = self.world.write();
        world.f0 = track.f0;
        world.time_axis = track.time_axis;
        world.frame_period = frame_period;
        Ok(())
    }

    pub fn store_spectrogram(&self, spectrogram: Vec<Vec<f64>>, fft_size: usize) -> Result<()> {
        self.charge(matrix_bytes(&spectrogram))?;
        let mut world = self.world.write();
        world.spectrogram = spectrogram;
        world.fft_size = fft_size;
        Ok(())
    }

    pub fn store_aperiodicity(&self, aperiodicity: Vec<Vec<f64>>) -> Result<()> {
        self.charge(matrix_bytes(&aperiodicity))?;
        self.world.write().aperiodicity = aperiodicity;
        Ok(())
    }

    pub fn output_audio(&self) -> Option<AudioBuffer> {
        self.output.read().clone()
    }

    pub fn store_output(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        self.charge(samples.len() * std::mem::size_of::<f32>())?;
        *self.output.write() = Some(AudioBuffer {
            samples: samples.into(),
            sample_rate,
        });
        Ok(())
    }

    /// Replace the slot array with `count` empty slots.
    pub fn allocate_shared_data(&self, count: usize) -> Result<()> {
        if count > 0 {
            self.pool
                .alloc(count * std::mem::size_of::<Option<SharedData>>())?;
        }
        *self.shared.write() = vec![None; count];
        Ok(())
    }

    pub fn shared_data_count(&self) -> usize {
        self.shared.read().len()
    }

    pub fn shared_data(&self, index: usize) -> Result<Option<SharedData>> {
        let slots = self.shared.read();
        slots
            .get(index)
            .cloned()
            .ok_or_else(|| slot_out_of_range(index, slots.len()))
    }

    pub fn set_shared_data(&self, index: usize, data: Option<SharedData>) -> Result<()> {
        let mut slots = self.shared.write();
        let len = slots.len();
        let slot = slots
            .get_mut(index)
            .ok_or_else(|| slot_out_of_range(index, len))?;
        *slot = data;
        Ok(())
    }

    pub fn memory_usage(&self) -> usize {
        self.pool.used()
    }

    pub fn peak_memory_usage(&self) -> usize {
        self.pool.peak()
    }

    /// Drop the previous run's results and release the run arena.
    pub(crate) fn begin_run(&self) -> Result<()> {
        *self.world.write() = WorldParameters::default();
        *self.output.write() = None;
        self.pool.reset();
        let slots = self.shared.read().len();
        if slots > 0 {
            self.pool
                .alloc(slots * std::mem::size_of::<Option<SharedData>>())?;
        }
        Ok(())
    }

    /// Put previously computed analysis results back in place.
    pub(crate) fn restore_world(&self, world: WorldParameters) -> Result<()> {
        self.charge(world.memory_footprint())?;
        *self.world.write() = world;
        Ok(())
    }

    fn charge(&self, bytes: usize) -> Result<()> {
        if bytes > 0 {
            self.pool.alloc(bytes)?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn for_testing() -> Self {
        let config = ExecutionConfig {
            memory_pool_size: 8 * 1024 * 1024,
            ..Default::default()
        };
        match Self::new(
            VoiceParameters::default(),
            crate::vocoder::ReferenceVocoder::shared(),
            &config,
        ) {
            Ok(ctx) => ctx,
            Err(e) => panic!("test context: {e}"),
        }
    }
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("backend", &self.backend.name())
            .field("frame_period", &self.frame_period)
            .field("memory_usage", &self.pool.used())
            .field("shared_slots", &self.shared_data_count())
            .finish_non_exhaustive()
    }
}

fn matrix_bytes(rows: &[Vec<f64>]) -> usize {
    rows.iter().map(Vec::len).sum::<usize>() * std::mem::size_of::<f64>()
}

fn slot_out_of_range(index: usize, len: usize) -> Error {
    Error::InvalidArgument(format!("shared data slot {index} out of range (0..{len})"))
}
