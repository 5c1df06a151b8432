//! The audio context: backend, slot pools, listener and timers behind
//! one lock.

use crate::audio::backend::{AudioBackend, NullBackend, SoftwareBackend};
use crate::audio::device::OutputDevice;
use crate::audio::file_io::{FileSystem, StdFileSystem};
use crate::audio::listener::Listener;
use crate::audio::pool::{SlotPool, TimerHandle};
use crate::audio::sample::{detach_sound, Sample2D};
use crate::audio::sample3d::Sample3D;
use crate::audio::stream::Stream;
use crate::audio::timer::TimerManager;
use crate::config::EngineConfig;
use crate::error::{AudioError, TimerError};
use crate::logging::AudioLogger;
use crate::models::StatusReporting;
use log::{info, warn};
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Everything guarded by the engine lock
pub(crate) struct EngineState {
    pub backend: Box<dyn AudioBackend>,
    pub output: Option<OutputDevice>,
    pub samples: SlotPool<Sample2D>,
    pub samples_3d: SlotPool<Sample3D>,
    pub streams: SlotPool<Stream>,
    pub listener: Listener,
    pub file_system: Arc<dyn FileSystem>,
    pub status_reporting: StatusReporting,
    pub stream_buffer_count: usize,
    pub stream_buffer_size: usize,
    pub last_error: Option<String>,
    pub shut_down: bool,
}

impl EngineState {
    pub fn record_error(&mut self, error: &impl Display) {
        self.last_error = Some(error.to_string());
    }

    pub fn ensure_running(&self) -> Result<(), AudioError> {
        if self.shut_down {
            Err(AudioError::InitializationFailed("audio system is shut down".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Owns one audio context. Every method takes `&self`; share it across
/// threads with an `Arc`.
pub struct AudioSystem {
    state: Mutex<EngineState>,
    pub(crate) timers: TimerManager,
    pub(crate) logger: AudioLogger,
    started_at: Instant,
}

impl AudioSystem {
    /// Open the configured output device and start mixing.
    ///
    /// Never fails: without a usable device the system runs on the
    /// silent backend and `is_available()` reports `false`.
    pub fn startup(config: &EngineConfig) -> Self {
        let config = config.validated();
        let software = SoftwareBackend::new(config.output_sample_rate);

        match OutputDevice::start(
            software.mixer(),
            config.preferred_device.as_deref(),
            config.output_sample_rate,
        ) {
            Ok(device) => {
                let system = Self::with_backend(&config, Box::new(software));
                system.lock().output = Some(device);
                system
            }
            Err(e) => {
                let system = Self::with_backend(&config, Box::new(NullBackend::new()));
                system.logger.log_backend_fallback(&e.to_string());
                system.lock().record_error(&e);
                system
            }
        }
    }

    /// Build a context over an explicit backend, with no output device
    pub fn with_backend(config: &EngineConfig, mut backend: Box<dyn AudioBackend>) -> Self {
        let config = config.validated();
        let logger = AudioLogger::new();
        let listener = Listener::from_config(&config);
        listener.apply(backend.as_mut());
        info!(
            "Audio system started on the {} backend ({} 2D, {} 3D, {} stream slots)",
            backend.name(),
            config.max_2d_samples,
            config.max_3d_samples,
            config.max_streams
        );

        Self {
            state: Mutex::new(EngineState {
                backend,
                output: None,
                samples: SlotPool::with_capacity(config.max_2d_samples),
                samples_3d: SlotPool::with_capacity(config.max_3d_samples),
                streams: SlotPool::with_capacity(config.max_streams),
                listener,
                file_system: Arc::new(StdFileSystem),
                status_reporting: config.status_reporting,
                stream_buffer_count: config.stream_buffer_count,
                stream_buffer_size: config.stream_buffer_size,
                last_error: None,
                shut_down: false,
            }),
            timers: TimerManager::new(config.max_timers, logger.clone()),
            logger,
            started_at: Instant::now(),
        }
    }

    /// Engine lock; a panic on another thread does not wedge audio
    pub(crate) fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stop timers, release every slot, then close the device.
    /// Later calls do nothing.
    pub fn shutdown(&self) {
        self.timers.release_all();

        let mut guard = self.lock();
        let state = &mut *guard;
        if state.shut_down {
            return;
        }
        state.shut_down = true;

        for raw in state.streams.handles() {
            if let Some(mut stream) = state.streams.remove(raw) {
                stream.teardown(state.backend.as_mut());
            }
        }
        for raw in state.samples_3d.handles() {
            if let Some(mut sample) = state.samples_3d.remove(raw) {
                detach_sound(state.backend.as_mut(), &sample.voice, &mut sample.buffer);
                state.backend.destroy_source(sample.voice.source);
            }
        }
        for raw in state.samples.handles() {
            if let Some(mut sample) = state.samples.remove(raw) {
                detach_sound(state.backend.as_mut(), &sample.voice, &mut sample.buffer);
                state.backend.destroy_source(sample.voice.source);
            }
        }

        state.output = None;
        state.backend = Box::new(NullBackend::new());
        info!("Audio system shut down");
    }

    /// Whether sound actually reaches a device
    pub fn is_available(&self) -> bool {
        let state = self.lock();
        !state.shut_down && state.backend.is_available()
    }

    pub fn backend_name(&self) -> String {
        self.lock().backend.name().to_string()
    }

    pub fn output_device_name(&self) -> Option<String> {
        self.lock().output.as_ref().map(|device| device.device_name().to_string())
    }

    /// Message of the most recent failure, if any
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn logger(&self) -> &AudioLogger {
        &self.logger
    }

    /// Route stream opens through `file_system`; already open streams
    /// keep their files.
    pub fn set_file_system(&self, file_system: Arc<dyn FileSystem>) {
        self.lock().file_system = file_system;
    }

    pub fn status_reporting(&self) -> StatusReporting {
        self.lock().status_reporting
    }

    pub fn set_status_reporting(&self, mode: StatusReporting) {
        self.lock().status_reporting = mode;
    }

    pub fn register_timer<F>(&self, callback: F) -> Result<TimerHandle, TimerError>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.timers.register(callback)
    }

    pub fn release_timer(&self, handle: TimerHandle) {
        self.timers.release(handle);
    }

    pub fn set_timer_period(&self, handle: TimerHandle, period_us: u64) {
        self.timers.set_period(handle, period_us);
    }

    pub fn set_timer_user_data(&self, handle: TimerHandle, value: u32) {
        self.timers.set_user_data(handle, value);
    }

    pub fn start_timer(&self, handle: TimerHandle) -> Result<(), TimerError> {
        let result = self.timers.start(handle);
        if let Err(e) = &result {
            warn!("Timer {} failed to start: {}", handle.index(), e);
            self.lock().record_error(e);
        }
        result
    }

    pub fn stop_timer(&self, handle: TimerHandle) {
        self.timers.stop(handle);
    }

    /// Sleep the calling thread
    pub fn delay(&self, ms: u32) {
        thread::sleep(Duration::from_millis(ms as u64));
    }

    /// Microseconds since the system started
    pub fn microseconds(&self) -> u64 {
        self.started_at.elapsed().as_micros() as u64
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
