//! Positional samples, heard from the listener in world coordinates.

use crate::audio::backend::{AudioBackend, BufferId, SourceParam};
use crate::audio::pool::Sample3dHandle;
use crate::audio::sample::{attach_sound, detach_sound, prepare_sound};
use crate::audio::state::Voice;
use crate::audio::system::AudioSystem;
use crate::error::AudioError;
use crate::models::{MsPosition, PlaybackStatus, SlotKind, Vec3, DEFAULT_MAX_DISTANCE, DEFAULT_MIN_DISTANCE, VOLUME_MAX};
use std::time::Instant;

pub(crate) struct Sample3D {
    pub voice: Voice,
    pub buffer: Option<BufferId>,
    pub total_samples: u32,
    /// Bytes in one frame of the loaded data
    pub frame_bytes: u32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub min_distance: f32,
    pub max_distance: f32,
    pub effects_level: f32,
}

impl Sample3D {
    fn apply_spatial(&self, backend: &mut dyn AudioBackend) {
        let source = self.voice.source;
        backend.set_source(source, SourceParam::Position(self.position));
        backend.set_source(source, SourceParam::Velocity(self.velocity));
        backend.set_source(source, SourceParam::ReferenceDistance(self.min_distance));
        backend.set_source(source, SourceParam::MaxDistance(self.max_distance));
    }
}

impl AudioSystem {
    /// Reserve a positional sample slot.
    pub fn allocate_3d_sample(&self) -> Result<Sample3dHandle, AudioError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.ensure_running()?;

        let Some(index) = state.samples_3d.first_free() else {
            let capacity = state.samples_3d.capacity();
            self.logger.log_pool_exhausted(SlotKind::Sample3D.name(), capacity);
            return Err(AudioError::PoolExhausted {
                kind: SlotKind::Sample3D,
                capacity,
            });
        };

        let source = state.backend.create_source()?;
        let sample = Sample3D {
            voice: Voice::new(source),
            buffer: None,
            total_samples: 0,
            frame_bytes: 0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            min_distance: DEFAULT_MIN_DISTANCE,
            max_distance: DEFAULT_MAX_DISTANCE,
            effects_level: 0.0,
        };
        let rolloff = state.listener.rolloff_factor;
        state.backend.set_source(source, SourceParam::Relative(false));
        state.backend.set_source(source, SourceParam::RolloffFactor(rolloff));
        sample.apply_spatial(state.backend.as_mut());

        match state.samples_3d.occupy(index, sample) {
            Some(handle) => {
                self.logger.log_slot_allocated(SlotKind::Sample3D.name(), index);
                Ok(Sample3dHandle(handle))
            }
            None => {
                state.backend.destroy_source(source);
                Err(AudioError::PoolExhausted {
                    kind: SlotKind::Sample3D,
                    capacity: state.samples_3d.capacity(),
                })
            }
        }
    }

    pub fn release_3d_sample(&self, handle: Sample3dHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(mut sample) = state.samples_3d.remove(handle.0) {
            detach_sound(state.backend.as_mut(), &sample.voice, &mut sample.buffer);
            state.backend.destroy_source(sample.voice.source);
            self.logger.log_slot_released(SlotKind::Sample3D.name(), handle.index());
        }
    }

    /// Load an in-memory WAV image. Only mono data can be positioned.
    pub fn set_3d_sample_file(&self, handle: Sample3dHandle, bytes: &[u8]) -> Result<(), AudioError> {
        let started = Instant::now();
        let sound = match prepare_sound(bytes, true) {
            Ok(sound) => sound,
            Err(e) => {
                self.logger.log_load_failed(SlotKind::Sample3D.name(), &e.to_string());
                self.lock().record_error(&e);
                return Err(e);
            }
        };
        self.logger.update_wav_parse_metrics(started.elapsed());

        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(sample) = state.samples_3d.get_mut(handle.0) else {
            return Ok(());
        };
        match attach_sound(state.backend.as_mut(), &mut sample.voice, &mut sample.buffer, &sound) {
            Ok(()) => {
                sample.total_samples = sound.total_samples;
                sample.frame_bytes = sound.format.bytes_per_frame() as u32;
                Ok(())
            }
            Err(e) => {
                self.logger.log_load_failed(SlotKind::Sample3D.name(), &e.to_string());
                state.record_error(&e);
                Err(e)
            }
        }
    }

    pub fn start_3d_sample(&self, handle: Sample3dHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples_3d.get_mut(handle.0) {
            sample.voice.apply(state.backend.as_mut(), true);
            sample.apply_spatial(state.backend.as_mut());
            sample.voice.play(state.backend.as_mut());
            self.logger.log_playback_started(
                SlotKind::Sample3D.name(),
                handle.index(),
                &format!(
                    "at ({:.1}, {:.1}, {:.1}), {} Hz",
                    sample.position.x, sample.position.y, sample.position.z, sample.voice.base_rate
                ),
            );
        }
    }

    pub fn stop_3d_sample(&self, handle: Sample3dHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples_3d.get_mut(handle.0) {
            sample.voice.stop(state.backend.as_mut());
        }
    }

    pub fn resume_3d_sample(&self, handle: Sample3dHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples_3d.get_mut(handle.0) {
            sample.voice.resume(state.backend.as_mut());
        }
    }

    pub fn end_3d_sample(&self, handle: Sample3dHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples_3d.get_mut(handle.0) {
            sample.voice.end(state.backend.as_mut());
        }
    }

    pub fn sample_3d_status(&self, handle: Sample3dHandle) -> PlaybackStatus {
        let state = self.lock();
        match state.samples_3d.get(handle.0) {
            Some(sample) => sample.voice.status(state.backend.as_ref(), state.status_reporting),
            None => PlaybackStatus::Free,
        }
    }

    pub fn set_3d_sample_volume(&self, handle: Sample3dHandle, volume: i32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples_3d.get_mut(handle.0) {
            sample.voice.set_volume(state.backend.as_mut(), volume);
        }
    }

    pub fn sample_3d_volume(&self, handle: Sample3dHandle) -> i32 {
        self.lock()
            .samples_3d
            .get(handle.0)
            .map_or(VOLUME_MAX, |sample| sample.voice.volume)
    }

    pub fn set_3d_sample_loop_count(&self, handle: Sample3dHandle, count: u32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples_3d.get_mut(handle.0) {
            sample.voice.set_loop_count(state.backend.as_mut(), count, true);
        }
    }

    pub fn sample_3d_loop_count(&self, handle: Sample3dHandle) -> u32 {
        self.lock()
            .samples_3d
            .get(handle.0)
            .map_or(1, |sample| sample.voice.loop_count)
    }

    pub fn set_3d_sample_playback_rate(&self, handle: Sample3dHandle, rate: u32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples_3d.get_mut(handle.0) {
            sample.voice.set_playback_rate(state.backend.as_mut(), rate);
        }
    }

    pub fn sample_3d_playback_rate(&self, handle: Sample3dHandle) -> u32 {
        self.lock()
            .samples_3d
            .get(handle.0)
            .map_or(0, |sample| sample.voice.playback_rate)
    }

    pub fn set_3d_sample_ms_position(&self, handle: Sample3dHandle, ms: u32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples_3d.get(handle.0) {
            sample.voice.set_ms_position(state.backend.as_mut(), ms);
        }
    }

    pub fn sample_3d_ms_position(&self, handle: Sample3dHandle) -> MsPosition {
        let state = self.lock();
        state.samples_3d.get(handle.0).map_or_else(MsPosition::default, |sample| {
            sample.voice.ms_position(state.backend.as_ref(), sample.total_samples)
        })
    }

    pub fn set_3d_sample_position(&self, handle: Sample3dHandle, position: Vec3) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples_3d.get_mut(handle.0) {
            sample.position = position;
            state
                .backend
                .set_source(sample.voice.source, SourceParam::Position(position));
        }
    }

    pub fn sample_3d_position(&self, handle: Sample3dHandle) -> Vec3 {
        self.lock()
            .samples_3d
            .get(handle.0)
            .map_or(Vec3::ZERO, |sample| sample.position)
    }

    pub fn set_3d_sample_velocity(&self, handle: Sample3dHandle, velocity: Vec3) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples_3d.get_mut(handle.0) {
            sample.velocity = velocity;
            state
                .backend
                .set_source(sample.voice.source, SourceParam::Velocity(velocity));
        }
    }

    pub fn sample_3d_velocity(&self, handle: Sample3dHandle) -> Vec3 {
        self.lock()
            .samples_3d
            .get(handle.0)
            .map_or(Vec3::ZERO, |sample| sample.velocity)
    }

    /// Full volume inside `min`, silent (or floor) beyond `max`.
    /// A `max` below `min` is raised to `min`.
    pub fn set_3d_sample_distances(&self, handle: Sample3dHandle, min: f32, max: f32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples_3d.get_mut(handle.0) {
            sample.min_distance = min.max(0.0);
            sample.max_distance = max.max(sample.min_distance);
            let source = sample.voice.source;
            state
                .backend
                .set_source(source, SourceParam::ReferenceDistance(sample.min_distance));
            state
                .backend
                .set_source(source, SourceParam::MaxDistance(sample.max_distance));
        }
    }

    /// `(min, max)`
    pub fn sample_3d_distances(&self, handle: Sample3dHandle) -> (f32, f32) {
        self.lock()
            .samples_3d
            .get(handle.0)
            .map_or((DEFAULT_MIN_DISTANCE, DEFAULT_MAX_DISTANCE), |sample| {
                (sample.min_distance, sample.max_distance)
            })
    }

    /// Stored for hosts that drive an effects send; clamped to 0.0..=1.0
    pub fn set_3d_sample_effects_level(&self, handle: Sample3dHandle, level: f32) {
        if let Some(sample) = self.lock().samples_3d.get_mut(handle.0) {
            sample.effects_level = level.clamp(0.0, 1.0);
        }
    }

    pub fn sample_3d_effects_level(&self, handle: Sample3dHandle) -> f32 {
        self.lock()
            .samples_3d
            .get(handle.0)
            .map_or(0.0, |sample| sample.effects_level)
    }

    /// Jump to a frame offset within the loaded data
    pub fn set_3d_sample_offset(&self, handle: Sample3dHandle, frame: u32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples_3d.get(handle.0) {
            let bytes = frame as u64 * sample.frame_bytes as u64;
            state.backend.set_byte_offset(sample.voice.source, bytes);
        }
    }

    /// Current frame offset, 0 when not playing
    pub fn sample_3d_offset(&self, handle: Sample3dHandle) -> u32 {
        let state = self.lock();
        match state.samples_3d.get(handle.0) {
            Some(sample) if sample.frame_bytes > 0 => {
                (state.backend.byte_offset(sample.voice.source) / sample.frame_bytes as u64) as u32
            }
            _ => 0,
        }
    }

    /// Length of the loaded data in frames
    pub fn sample_3d_length(&self, handle: Sample3dHandle) -> u32 {
        self.lock()
            .samples_3d
            .get(handle.0)
            .map_or(0, |sample| sample.total_samples)
    }

    pub fn set_3d_sample_user_data(&self, handle: Sample3dHandle, index: usize, value: i32) {
        if let Some(sample) = self.lock().samples_3d.get_mut(handle.0) {
            sample.voice.set_user_data(index, value);
        }
    }

    pub fn sample_3d_user_data(&self, handle: Sample3dHandle, index: usize) -> i32 {
        self.lock()
            .samples_3d
            .get(handle.0)
            .map_or(0, |sample| sample.voice.user_data(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::SoftwareBackend;
    use crate::audio::wav::encode_pcm_wav;
    use crate::config::EngineConfig;

    fn system() -> AudioSystem {
        AudioSystem::with_backend(&EngineConfig::default(), Box::new(SoftwareBackend::new(22050)))
    }

    fn mono(frames: usize) -> Vec<u8> {
        encode_pcm_wav(1, 22050, 16, &vec![0u8; frames * 2])
    }

    #[test]
    fn test_allocate_defaults() {
        let system = system();
        let handle = system.allocate_3d_sample().unwrap();
        assert_eq!(system.sample_3d_distances(handle), (1.0, 1000.0));
        assert_eq!(system.sample_3d_position(handle), Vec3::ZERO);
        assert_eq!(system.sample_3d_volume(handle), 127);
        assert_eq!(system.sample_3d_status(handle), PlaybackStatus::Stopped);
    }

    #[test]
    fn test_stereo_is_refused_and_slot_untouched() {
        let system = system();
        let handle = system.allocate_3d_sample().unwrap();
        system.set_3d_sample_file(handle, &mono(2205)).unwrap();

        let stereo = encode_pcm_wav(2, 22050, 16, &[0u8; 400]);
        assert!(matches!(
            system.set_3d_sample_file(handle, &stereo),
            Err(AudioError::UnsupportedLayout { channels: 2, .. })
        ));
        assert_eq!(system.sample_3d_length(handle), 2205);
    }

    #[test]
    fn test_distances_keep_min_below_max() {
        let system = system();
        let handle = system.allocate_3d_sample().unwrap();

        system.set_3d_sample_distances(handle, 5.0, 50.0);
        assert_eq!(system.sample_3d_distances(handle), (5.0, 50.0));

        system.set_3d_sample_distances(handle, 20.0, 10.0);
        assert_eq!(system.sample_3d_distances(handle), (20.0, 20.0));
    }

    #[test]
    fn test_position_velocity_and_effects() {
        let system = system();
        let handle = system.allocate_3d_sample().unwrap();
        system.set_3d_sample_position(handle, Vec3::new(3.0, 0.0, -4.0));
        system.set_3d_sample_velocity(handle, Vec3::new(1.0, 0.0, 0.0));
        system.set_3d_sample_effects_level(handle, 1.5);

        assert_eq!(system.sample_3d_position(handle), Vec3::new(3.0, 0.0, -4.0));
        assert_eq!(system.sample_3d_velocity(handle), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(system.sample_3d_effects_level(handle), 1.0);
    }

    #[test]
    fn test_frame_offset_while_playing() {
        let system = system();
        let handle = system.allocate_3d_sample().unwrap();
        system.set_3d_sample_file(handle, &mono(22050)).unwrap();
        assert_eq!(system.sample_3d_offset(handle), 0);

        system.start_3d_sample(handle);
        system.set_3d_sample_offset(handle, 1000);
        assert_eq!(system.sample_3d_offset(handle), 1000);
        assert_eq!(system.sample_3d_ms_position(handle).total_ms, 1000);
    }

    #[test]
    fn test_release_then_use_is_harmless() {
        let system = system();
        let a = system.allocate_3d_sample().unwrap();
        let b = system.allocate_3d_sample().unwrap();
        system.set_3d_sample_user_data(b, 1, 77);

        system.release_3d_sample(a);
        system.release_3d_sample(a);
        system.set_3d_sample_position(a, Vec3::new(9.0, 9.0, 9.0));

        assert_eq!(system.sample_3d_status(a), PlaybackStatus::Free);
        assert_eq!(system.sample_3d_user_data(b, 1), 77);
        assert_eq!(system.sample_3d_position(b), Vec3::ZERO);
    }
}
