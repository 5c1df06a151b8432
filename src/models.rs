use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// Loudest volume a slot accepts (legacy 7-bit scale)
pub const VOLUME_MAX: i32 = 127;
/// Pan value that places a sound dead center
pub const PAN_CENTER: i32 = 64;
/// Rightmost pan value
pub const PAN_MAX: i32 = 127;
/// Playback rate a freshly allocated slot reports before data is loaded
pub const DEFAULT_PLAYBACK_RATE: u32 = 22050;
/// Number of opaque user values carried by every slot
pub const USER_DATA_SLOTS: usize = 4;
/// Default 3D attenuation distances
pub const DEFAULT_MIN_DISTANCE: f32 = 1.0;
pub const DEFAULT_MAX_DISTANCE: f32 = 1000.0;
/// Speed of sound in air at a distance factor of 1.0 (metres per second)
pub const SPEED_OF_SOUND: f32 = 343.0;

/// Clamp a volume to the 0..=127 range.
pub fn clamp_volume(volume: i32) -> i32 {
    volume.clamp(0, VOLUME_MAX)
}

/// Clamp a pan value to the 0..=127 range.
pub fn clamp_pan(pan: i32) -> i32 {
    pan.clamp(0, PAN_MAX)
}

/// Convert a 0..=127 volume into a linear gain.
pub fn volume_to_gain(volume: i32) -> f32 {
    clamp_volume(volume) as f32 / VOLUME_MAX as f32
}

/// Map a pan value onto the listener-relative stereo axis.
///
/// Pan 0 is hard left (`x = -1`), 64 is center and 127 lands at
/// `63/64`. The source sits one unit in front of the listener so the
/// distance never collapses to zero.
pub fn pan_to_position(pan: i32) -> Vec3 {
    let x = ((clamp_pan(pan) - PAN_CENTER) as f32 / PAN_CENTER as f32).clamp(-1.0, 1.0);
    Vec3::new(x, 0.0, -1.0)
}

/// Plain 3-component vector used for positions, velocities and orientation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction, or zero for a zero-length input
    pub fn normalized(self) -> Vec3 {
        let len = self.length();
        if len > f32::EPSILON {
            self * (1.0 / len)
        } else {
            Vec3::ZERO
        }
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;
    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

/// The kinds of fixed-capacity pools the engine manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Sample2D,
    Sample3D,
    Stream,
    Timer,
}

impl SlotKind {
    pub fn name(&self) -> &'static str {
        match self {
            SlotKind::Sample2D => "2D sample",
            SlotKind::Sample3D => "3D sample",
            SlotKind::Stream => "stream",
            SlotKind::Timer => "timer",
        }
    }
}

/// Externally reported playback status of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackStatus {
    /// Slot is not allocated (or the handle is stale)
    Free,
    /// Loaded but not advancing
    Stopped,
    Playing,
    /// Paused by `stop`; only reported in [`StatusReporting::Distinct`] mode
    Paused,
    /// Reached its natural end
    Done,
}

impl PlaybackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackStatus::Free => "free",
            PlaybackStatus::Stopped => "stopped",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Done => "done",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, PlaybackStatus::Done | PlaybackStatus::Free)
    }
}

/// Length and play position of a slot in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MsPosition {
    pub total_ms: u32,
    pub current_ms: u32,
}

/// How a hardware "paused" state is reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusReporting {
    /// Paused sounds report `Stopped`, matching the legacy API
    #[default]
    Legacy,
    /// Paused sounds report `Paused`
    Distinct,
}

/// Speaker configuration advertised to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerLayout {
    Headphones,
    #[default]
    Stereo,
    Quad,
    Surround51,
    Surround71,
}

impl SpeakerLayout {
    pub fn channel_count(&self) -> u16 {
        match self {
            SpeakerLayout::Headphones | SpeakerLayout::Stereo => 2,
            SpeakerLayout::Quad => 4,
            SpeakerLayout::Surround51 => 6,
            SpeakerLayout::Surround71 => 8,
        }
    }
}

/// Device-wide distance attenuation curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceModel {
    None,
    Inverse,
    #[default]
    InverseClamped,
    Linear,
    LinearClamped,
    Exponent,
    ExponentClamped,
}
