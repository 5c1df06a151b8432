use super::{AudioBackend, BufferFormat, BufferId, SourceId, SourceParam, SourceState};
use crate::error::BackendError;
use crate::models::{DistanceModel, SpeakerLayout, Vec3};

/// Silent backend used when no output device can be opened.
///
/// Ids are handed out so callers never special-case its absence. Every
/// source reports `Stopped` with nothing queued, so sounds finish at once.
#[derive(Debug, Default)]
pub struct NullBackend {
    next_id: u32,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u32 {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.next_id
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn create_source(&mut self) -> Result<SourceId, BackendError> {
        Ok(self.next())
    }

    fn destroy_source(&mut self, _source: SourceId) {}

    fn create_buffer(&mut self) -> Result<BufferId, BackendError> {
        Ok(self.next())
    }

    fn destroy_buffer(&mut self, _buffer: BufferId) {}

    fn upload(&mut self, _buffer: BufferId, _format: BufferFormat, _data: &[u8], _rate: u32) -> Result<(), BackendError> {
        Ok(())
    }

    fn set_source(&mut self, _source: SourceId, _param: SourceParam) {}
    fn attach_buffer(&mut self, _source: SourceId, _buffer: Option<BufferId>) {}
    fn play(&mut self, _source: SourceId) {}
    fn pause(&mut self, _source: SourceId) {}
    fn stop(&mut self, _source: SourceId) {}
    fn rewind(&mut self, _source: SourceId) {}

    fn source_state(&self, _source: SourceId) -> SourceState {
        SourceState::Stopped
    }

    fn queue_buffers(&mut self, _source: SourceId, _buffers: &[BufferId]) -> Result<(), BackendError> {
        Ok(())
    }

    fn unqueue_buffers(&mut self, _source: SourceId, _count: usize) -> Vec<BufferId> {
        Vec::new()
    }

    fn buffers_queued(&self, _source: SourceId) -> usize {
        0
    }

    fn buffers_processed(&self, _source: SourceId) -> usize {
        0
    }

    fn byte_offset(&self, _source: SourceId) -> u64 {
        0
    }

    fn set_byte_offset(&mut self, _source: SourceId, _offset: u64) {}

    fn sec_offset(&self, _source: SourceId) -> f32 {
        0.0
    }

    fn set_sec_offset(&mut self, _source: SourceId, _seconds: f32) {}
    fn set_listener_position(&mut self, _position: Vec3) {}
    fn set_listener_velocity(&mut self, _velocity: Vec3) {}
    fn set_listener_orientation(&mut self, _forward: Vec3, _up: Vec3) {}
    fn set_listener_gain(&mut self, _gain: f32) {}
    fn set_doppler_factor(&mut self, _factor: f32) {}
    fn set_speed_of_sound(&mut self, _speed: f32) {}
    fn set_distance_model(&mut self, _model: DistanceModel) {}
    fn set_speaker_layout(&mut self, _layout: SpeakerLayout) {}
}
