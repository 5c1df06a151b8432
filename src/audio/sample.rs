//! Non-positional samples: in-memory sounds panned on the stereo axis.

use crate::audio::backend::{AudioBackend, BufferFormat, BufferId, SourceParam};
use crate::audio::pool::SampleHandle;
use crate::audio::state::Voice;
use crate::audio::system::AudioSystem;
use crate::audio::wav::{parse_wav, SoundInfo};
use crate::error::AudioError;
use crate::models::{clamp_pan, pan_to_position, MsPosition, PlaybackStatus, SlotKind, VOLUME_MAX, PAN_CENTER};
use std::time::Instant;

pub(crate) struct Sample2D {
    pub voice: Voice,
    pub buffer: Option<BufferId>,
    pub pan: i32,
    pub total_samples: u32,
}

impl Sample2D {
    fn apply_pan(&self, backend: &mut dyn AudioBackend) {
        backend.set_source(self.voice.source, SourceParam::Position(pan_to_position(self.pan)));
    }
}

/// Decoded PCM ready for upload
pub(crate) struct LoadedSound<'a> {
    pub info: SoundInfo<'a>,
    pub format: BufferFormat,
    pub total_samples: u32,
}

/// Parse a WAV image and check that the hardware can take it
pub(crate) fn prepare_sound(bytes: &[u8], mono_only: bool) -> Result<LoadedSound<'_>, AudioError> {
    let info = parse_wav(bytes)?;
    info.format.require_pcm()?;
    let channels = info.format.channels;
    let bits = info.format.bits_per_sample;
    let format = BufferFormat::from_layout(channels, bits)
        .filter(|format| !mono_only || format.channels() == 1)
        .ok_or(AudioError::UnsupportedLayout { channels, bits })?;
    let total_samples = info.sample_count().unwrap_or(0);
    Ok(LoadedSound {
        info,
        format,
        total_samples,
    })
}

/// Upload `sound` into a fresh buffer and swap it onto the voice's source.
///
/// The previous buffer is only released once the new one is uploaded.
pub(crate) fn attach_sound(
    backend: &mut dyn AudioBackend,
    voice: &mut Voice,
    old_buffer: &mut Option<BufferId>,
    sound: &LoadedSound<'_>,
) -> Result<(), AudioError> {
    let buffer = backend.create_buffer()?;
    if let Err(e) = backend.upload(buffer, sound.format, sound.info.data, sound.info.format.sample_rate) {
        backend.destroy_buffer(buffer);
        return Err(e.into());
    }

    backend.stop(voice.source);
    backend.attach_buffer(voice.source, None);
    if let Some(old) = old_buffer.take() {
        backend.destroy_buffer(old);
    }
    backend.attach_buffer(voice.source, Some(buffer));
    *old_buffer = Some(buffer);

    voice.base_rate = sound.info.format.sample_rate;
    voice.playback_rate = sound.info.format.sample_rate;
    Ok(())
}

/// Stop the source and drop its buffer
pub(crate) fn detach_sound(backend: &mut dyn AudioBackend, voice: &Voice, buffer: &mut Option<BufferId>) {
    backend.stop(voice.source);
    backend.attach_buffer(voice.source, None);
    if let Some(old) = buffer.take() {
        backend.destroy_buffer(old);
    }
}

impl AudioSystem {
    /// Reserve a 2D sample slot.
    pub fn allocate_sample(&self) -> Result<SampleHandle, AudioError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.ensure_running()?;

        let Some(index) = state.samples.first_free() else {
            let capacity = state.samples.capacity();
            self.logger.log_pool_exhausted(SlotKind::Sample2D.name(), capacity);
            return Err(AudioError::PoolExhausted {
                kind: SlotKind::Sample2D,
                capacity,
            });
        };

        let source = state.backend.create_source()?;
        let sample = Sample2D {
            voice: Voice::new(source),
            buffer: None,
            pan: PAN_CENTER,
            total_samples: 0,
        };
        state.backend.set_source(source, SourceParam::Relative(true));
        state.backend.set_source(source, SourceParam::RolloffFactor(0.0));
        sample.apply_pan(state.backend.as_mut());

        match state.samples.occupy(index, sample) {
            Some(handle) => {
                self.logger.log_slot_allocated(SlotKind::Sample2D.name(), index);
                Ok(SampleHandle(handle))
            }
            None => {
                state.backend.destroy_source(source);
                Err(AudioError::PoolExhausted {
                    kind: SlotKind::Sample2D,
                    capacity: state.samples.capacity(),
                })
            }
        }
    }

    /// Stop, free the buffer and source, and return the slot to the pool.
    /// Stale handles are ignored.
    pub fn release_sample(&self, handle: SampleHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(mut sample) = state.samples.remove(handle.0) {
            detach_sound(state.backend.as_mut(), &sample.voice, &mut sample.buffer);
            state.backend.destroy_source(sample.voice.source);
            self.logger.log_slot_released(SlotKind::Sample2D.name(), handle.index());
        }
    }

    /// Unload the sample and restore default volume, pan and loop count.
    pub fn init_sample(&self, handle: SampleHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples.get_mut(handle.0) {
            detach_sound(state.backend.as_mut(), &sample.voice, &mut sample.buffer);
            sample.voice.reset();
            sample.pan = PAN_CENTER;
            sample.total_samples = 0;
            sample.voice.apply(state.backend.as_mut(), true);
            sample.apply_pan(state.backend.as_mut());
        }
    }

    /// Load an in-memory WAV image into the sample.
    ///
    /// On failure the slot keeps whatever it had loaded before.
    pub fn set_sample_file(&self, handle: SampleHandle, bytes: &[u8]) -> Result<(), AudioError> {
        let started = Instant::now();
        let sound = match prepare_sound(bytes, false) {
            Ok(sound) => sound,
            Err(e) => {
                self.logger.log_load_failed(SlotKind::Sample2D.name(), &e.to_string());
                self.lock().record_error(&e);
                return Err(e);
            }
        };
        self.logger.update_wav_parse_metrics(started.elapsed());

        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(sample) = state.samples.get_mut(handle.0) else {
            return Ok(());
        };
        let result = attach_sound(state.backend.as_mut(), &mut sample.voice, &mut sample.buffer, &sound);
        match result {
            Ok(()) => {
                sample.total_samples = sound.total_samples;
                Ok(())
            }
            Err(e) => {
                self.logger.log_load_failed(SlotKind::Sample2D.name(), &e.to_string());
                state.record_error(&e);
                Err(e)
            }
        }
    }

    /// Apply volume, pan, loop and rate, then play from the start.
    pub fn start_sample(&self, handle: SampleHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples.get_mut(handle.0) {
            sample.voice.apply(state.backend.as_mut(), true);
            sample.apply_pan(state.backend.as_mut());
            sample.voice.play(state.backend.as_mut());
            self.logger.log_playback_started(
                SlotKind::Sample2D.name(),
                handle.index(),
                &format!("{} Hz, pitch {:.2}", sample.voice.base_rate, sample.voice.pitch()),
            );
        }
    }

    pub fn stop_sample(&self, handle: SampleHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples.get_mut(handle.0) {
            sample.voice.stop(state.backend.as_mut());
        }
    }

    pub fn resume_sample(&self, handle: SampleHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples.get_mut(handle.0) {
            sample.voice.resume(state.backend.as_mut());
        }
    }

    pub fn end_sample(&self, handle: SampleHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples.get_mut(handle.0) {
            sample.voice.end(state.backend.as_mut());
        }
    }

    pub fn sample_status(&self, handle: SampleHandle) -> PlaybackStatus {
        let state = self.lock();
        match state.samples.get(handle.0) {
            Some(sample) => sample.voice.status(state.backend.as_ref(), state.status_reporting),
            None => PlaybackStatus::Free,
        }
    }

    pub fn set_sample_volume(&self, handle: SampleHandle, volume: i32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples.get_mut(handle.0) {
            sample.voice.set_volume(state.backend.as_mut(), volume);
        }
    }

    pub fn sample_volume(&self, handle: SampleHandle) -> i32 {
        self.lock()
            .samples
            .get(handle.0)
            .map_or(VOLUME_MAX, |sample| sample.voice.volume)
    }

    pub fn set_sample_pan(&self, handle: SampleHandle, pan: i32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples.get_mut(handle.0) {
            sample.pan = clamp_pan(pan);
            sample.apply_pan(state.backend.as_mut());
        }
    }

    pub fn sample_pan(&self, handle: SampleHandle) -> i32 {
        self.lock()
            .samples
            .get(handle.0)
            .map_or(PAN_CENTER, |sample| sample.pan)
    }

    /// Zero loops forever; any other count plays once
    pub fn set_sample_loop_count(&self, handle: SampleHandle, count: u32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples.get_mut(handle.0) {
            sample.voice.set_loop_count(state.backend.as_mut(), count, true);
        }
    }

    pub fn sample_loop_count(&self, handle: SampleHandle) -> u32 {
        self.lock().samples.get(handle.0).map_or(1, |sample| sample.voice.loop_count)
    }

    pub fn set_sample_playback_rate(&self, handle: SampleHandle, rate: u32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples.get_mut(handle.0) {
            sample.voice.set_playback_rate(state.backend.as_mut(), rate);
        }
    }

    pub fn sample_playback_rate(&self, handle: SampleHandle) -> u32 {
        self.lock()
            .samples
            .get(handle.0)
            .map_or(0, |sample| sample.voice.playback_rate)
    }

    pub fn set_sample_ms_position(&self, handle: SampleHandle, ms: u32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(sample) = state.samples.get(handle.0) {
            sample.voice.set_ms_position(state.backend.as_mut(), ms);
        }
    }

    pub fn sample_ms_position(&self, handle: SampleHandle) -> MsPosition {
        let state = self.lock();
        state.samples.get(handle.0).map_or_else(MsPosition::default, |sample| {
            sample.voice.ms_position(state.backend.as_ref(), sample.total_samples)
        })
    }

    pub fn set_sample_user_data(&self, handle: SampleHandle, index: usize, value: i32) {
        if let Some(sample) = self.lock().samples.get_mut(handle.0) {
            sample.voice.set_user_data(index, value);
        }
    }

    pub fn sample_user_data(&self, handle: SampleHandle, index: usize) -> i32 {
        self.lock()
            .samples
            .get(handle.0)
            .map_or(0, |sample| sample.voice.user_data(index))
    }
}
