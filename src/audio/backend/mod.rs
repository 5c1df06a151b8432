//! The hardware audio boundary.
//!
//! Everything the engine asks of the sound hardware goes through
//! [`AudioBackend`]: sources (voices) play buffers (uploaded PCM). The
//! operation set mirrors the OpenAL source/buffer model.

mod null;
mod software;

pub use null::NullBackend;
pub use software::{MixerHandle, SoftwareBackend};

use crate::error::BackendError;
use crate::models::{DistanceModel, SpeakerLayout, Vec3};

pub type SourceId = u32;
pub type BufferId = u32;

/// Play state reported by a hardware source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Never played, or rewound
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// Upload layouts the hardware accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFormat {
    Mono8,
    Mono16,
    Stereo8,
    Stereo16,
}

impl BufferFormat {
    pub fn from_layout(channels: u16, bits: u16) -> Option<Self> {
        match (channels, bits) {
            (1, 8) => Some(BufferFormat::Mono8),
            (1, 16) => Some(BufferFormat::Mono16),
            (2, 8) => Some(BufferFormat::Stereo8),
            (2, 16) => Some(BufferFormat::Stereo16),
            _ => None,
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            BufferFormat::Mono8 | BufferFormat::Mono16 => 1,
            BufferFormat::Stereo8 | BufferFormat::Stereo16 => 2,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            BufferFormat::Mono8 | BufferFormat::Stereo8 => 1,
            BufferFormat::Mono16 | BufferFormat::Stereo16 => 2,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels() * self.bytes_per_sample()
    }
}

/// Per-source scalar and vector parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceParam {
    Gain(f32),
    Pitch(f32),
    Looping(bool),
    Position(Vec3),
    Velocity(Vec3),
    ReferenceDistance(f32),
    MaxDistance(f32),
    RolloffFactor(f32),
    /// Position is interpreted relative to the listener
    Relative(bool),
}

/// Operation set consumed from the sound hardware.
///
/// Calls naming an unknown source or buffer are ignored; only creation
/// and upload report failures.
pub trait AudioBackend: Send {
    fn name(&self) -> &str;

    /// Whether this backend actually produces sound
    fn is_available(&self) -> bool;

    fn create_source(&mut self) -> Result<SourceId, BackendError>;
    fn destroy_source(&mut self, source: SourceId);

    fn create_buffer(&mut self) -> Result<BufferId, BackendError>;
    fn destroy_buffer(&mut self, buffer: BufferId);

    fn upload(
        &mut self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<(), BackendError>;

    fn set_source(&mut self, source: SourceId, param: SourceParam);

    /// Replace the source's queue with a single static buffer, or clear it
    fn attach_buffer(&mut self, source: SourceId, buffer: Option<BufferId>);

    fn play(&mut self, source: SourceId);
    fn pause(&mut self, source: SourceId);
    fn stop(&mut self, source: SourceId);
    fn rewind(&mut self, source: SourceId);
    fn source_state(&self, source: SourceId) -> SourceState;

    fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), BackendError>;

    /// Remove up to `count` processed buffers from the head of the queue
    fn unqueue_buffers(&mut self, source: SourceId, count: usize) -> Vec<BufferId>;
    fn buffers_queued(&self, source: SourceId) -> usize;
    fn buffers_processed(&self, source: SourceId) -> usize;

    /// Playback offset in bytes from the head of the queue
    fn byte_offset(&self, source: SourceId) -> u64;
    fn set_byte_offset(&mut self, source: SourceId, offset: u64);
    fn sec_offset(&self, source: SourceId) -> f32;
    fn set_sec_offset(&mut self, source: SourceId, seconds: f32);

    fn set_listener_position(&mut self, position: Vec3);
    fn set_listener_velocity(&mut self, velocity: Vec3);
    fn set_listener_orientation(&mut self, forward: Vec3, up: Vec3);
    fn set_listener_gain(&mut self, gain: f32);
    fn set_doppler_factor(&mut self, factor: f32);
    fn set_speed_of_sound(&mut self, speed: f32);
    fn set_distance_model(&mut self, model: DistanceModel);
    fn set_speaker_layout(&mut self, layout: SpeakerLayout);
}
