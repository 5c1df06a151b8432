//! In-process implementation of the source/buffer model.
//!
//! [`SoftwareBackend`] is driven by the engine under its global lock;
//! the output device pulls mixed frames through a cloned [`MixerHandle`].
//! Both share one `Mutex<MixerState>`, so the device callback never
//! touches engine state.

use super::{AudioBackend, BufferFormat, BufferId, SourceId, SourceParam, SourceState};
use crate::error::BackendError;
use crate::models::{DistanceModel, SpeakerLayout, Vec3, SPEED_OF_SOUND};
use std::collections::{HashMap, VecDeque};
use std::f32::consts::FRAC_PI_4;
use std::sync::{Arc, Mutex, MutexGuard};

struct MixBuffer {
    format: BufferFormat,
    sample_rate: u32,
    /// Interleaved samples normalized to [-1, 1]
    samples: Vec<f32>,
    frames: usize,
}

impl MixBuffer {
    fn decode(format: BufferFormat, data: &[u8], sample_rate: u32) -> Self {
        let whole = data.len() - data.len() % format.bytes_per_frame();
        let data = &data[..whole];
        let samples: Vec<f32> = match format.bytes_per_sample() {
            1 => data.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
            _ => data
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
                .collect(),
        };
        let frames = samples.len() / format.channels();
        Self {
            format,
            sample_rate,
            samples,
            frames,
        }
    }

    fn byte_len(&self) -> u64 {
        (self.frames * self.format.bytes_per_frame()) as u64
    }

    /// Linearly interpolated (left, right) at a fractional frame position
    fn frame_at(&self, position: f64) -> (f32, f32) {
        let index = position as usize;
        let frac = (position - index as f64) as f32;
        let next = (index + 1).min(self.frames.saturating_sub(1));
        let channels = self.format.channels();

        let pick = |frame: usize, channel: usize| self.samples[frame * channels + channel];
        let lerp = |channel: usize| {
            let a = pick(index, channel);
            a + (pick(next, channel) - a) * frac
        };

        if channels == 1 {
            let s = lerp(0);
            (s, s)
        } else {
            (lerp(0), lerp(1))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PendingOffset {
    Bytes(u64),
    Seconds(f32),
}

struct MixSource {
    state: SourceState,
    queue: VecDeque<BufferId>,
    /// Index of the playing buffer; everything before it is processed
    current: usize,
    /// Fractional frame position inside the current buffer
    cursor: f64,
    pending_offset: Option<PendingOffset>,
    gain: f32,
    pitch: f32,
    looping: bool,
    position: Vec3,
    velocity: Vec3,
    reference_distance: f32,
    max_distance: f32,
    rolloff: f32,
    relative: bool,
}

impl Default for MixSource {
    fn default() -> Self {
        Self {
            state: SourceState::Initial,
            queue: VecDeque::new(),
            current: 0,
            cursor: 0.0,
            pending_offset: None,
            gain: 1.0,
            pitch: 1.0,
            looping: false,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            reference_distance: 1.0,
            max_distance: f32::MAX,
            rolloff: 1.0,
            relative: false,
        }
    }
}

struct ListenerParams {
    position: Vec3,
    velocity: Vec3,
    forward: Vec3,
    up: Vec3,
    gain: f32,
}

struct MixerState {
    output_rate: u32,
    next_id: u32,
    sources: HashMap<SourceId, MixSource>,
    buffers: HashMap<BufferId, MixBuffer>,
    listener: ListenerParams,
    doppler_factor: f32,
    speed_of_sound: f32,
    distance_model: DistanceModel,
    speaker_layout: SpeakerLayout,
}

impl MixerState {
    fn new(output_rate: u32) -> Self {
        Self {
            output_rate: output_rate.max(1),
            next_id: 0,
            sources: HashMap::new(),
            buffers: HashMap::new(),
            listener: ListenerParams {
                position: Vec3::ZERO,
                velocity: Vec3::ZERO,
                forward: Vec3::new(0.0, 0.0, -1.0),
                up: Vec3::new(0.0, 1.0, 0.0),
                gain: 1.0,
            },
            doppler_factor: 1.0,
            speed_of_sound: SPEED_OF_SOUND,
            distance_model: DistanceModel::InverseClamped,
            speaker_layout: SpeakerLayout::Stereo,
        }
    }

    fn next_id(&mut self) -> u32 {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.next_id
    }

    fn bytes_in(&self, buffer: BufferId) -> u64 {
        self.buffers.get(&buffer).map_or(0, |b| b.byte_len())
    }

    /// Move a source to `offset` within its queue
    fn seek(&mut self, source: SourceId, offset: PendingOffset) {
        let Some(src) = self.sources.get(&source) else {
            return;
        };
        let mut current = 0;
        let mut cursor = 0.0;
        let mut remaining = offset;
        for (index, id) in src.queue.iter().enumerate() {
            let Some(buffer) = self.buffers.get(id) else {
                continue;
            };
            let (frames_left, fits) = match remaining {
                PendingOffset::Bytes(bytes) => {
                    let frames = bytes / buffer.format.bytes_per_frame() as u64;
                    (frames as f64, bytes < buffer.byte_len())
                }
                PendingOffset::Seconds(secs) => {
                    let frames = secs as f64 * buffer.sample_rate as f64;
                    (frames, frames < buffer.frames as f64)
                }
            };
            current = index;
            if fits {
                cursor = frames_left.floor();
                break;
            }
            remaining = match remaining {
                PendingOffset::Bytes(bytes) => PendingOffset::Bytes(bytes - buffer.byte_len()),
                PendingOffset::Seconds(secs) => {
                    PendingOffset::Seconds(secs - buffer.frames as f32 / buffer.sample_rate as f32)
                }
            };
            current = index + 1;
        }
        if let Some(src) = self.sources.get_mut(&source) {
            src.current = current;
            src.cursor = cursor;
        }
    }

    /// Advance past exhausted buffers; returns false once the source stops
    fn settle(src: &mut MixSource, buffers: &HashMap<BufferId, MixBuffer>) -> bool {
        let mut hops = 0;
        loop {
            if src.current >= src.queue.len() {
                if src.looping && !src.queue.is_empty() && hops <= src.queue.len() {
                    src.current = 0;
                } else {
                    src.state = SourceState::Stopped;
                    src.current = src.queue.len();
                    src.cursor = 0.0;
                    return false;
                }
            }
            let frames = buffers.get(&src.queue[src.current]).map_or(0, |b| b.frames);
            if src.cursor < frames as f64 {
                return true;
            }
            src.cursor -= frames as f64;
            src.current += 1;
            hops += 1;
        }
    }

    fn mix(&mut self, out: &mut [f32]) {
        out.iter_mut().for_each(|s| *s = 0.0);
        let frames = out.len() / 2;
        let output_rate = self.output_rate as f64;

        let ids: Vec<SourceId> = self
            .sources
            .iter()
            .filter(|(_, src)| src.state == SourceState::Playing)
            .map(|(id, _)| *id)
            .collect();

        for id in ids {
            let Some(src) = self.sources.get(&id) else {
                continue;
            };
            let spatial = Spatial::compute(src, self);
            let buffers = &self.buffers;
            let Some(src) = self.sources.get_mut(&id) else {
                continue;
            };

            for frame in 0..frames {
                if !Self::settle(src, buffers) {
                    break;
                }
                let Some(buffer) = buffers.get(&src.queue[src.current]) else {
                    break;
                };
                let (left, right) = buffer.frame_at(src.cursor);
                let (gl, gr) = if buffer.format.channels() == 1 {
                    (spatial.left, spatial.right)
                } else {
                    (spatial.direct, spatial.direct)
                };
                out[frame * 2] += left * gl;
                out[frame * 2 + 1] += right * gr;

                src.cursor += buffer.sample_rate as f64 * spatial.pitch / output_rate;
            }
            Self::settle(src, buffers);
        }

        out.iter_mut().for_each(|s| *s = s.clamp(-1.0, 1.0));
    }
}

/// Per-render gains and pitch for one source
struct Spatial {
    left: f32,
    right: f32,
    /// Gain applied to multi-channel buffers, which are never spatialized
    direct: f32,
    pitch: f64,
}

impl Spatial {
    fn compute(src: &MixSource, mixer: &MixerState) -> Self {
        let listener = &mixer.listener;
        let direct = (src.gain * listener.gain).max(0.0);

        let (offset, right_axis, listener_velocity) = if src.relative {
            (src.position, Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO)
        } else {
            (
                src.position - listener.position,
                listener.forward.cross(listener.up).normalized(),
                listener.velocity,
            )
        };

        let distance = offset.length();
        let attenuation = distance_gain(
            mixer.distance_model,
            distance,
            src.reference_distance,
            src.max_distance,
            src.rolloff,
        );

        let x = if distance > f32::EPSILON {
            offset.normalized().dot(right_axis).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let angle = (x + 1.0) * FRAC_PI_4;
        let gain = direct * attenuation;

        let shift = doppler_shift(
            -offset,
            listener_velocity,
            src.velocity,
            mixer.doppler_factor,
            mixer.speed_of_sound,
        );

        Self {
            left: gain * angle.cos(),
            right: gain * angle.sin(),
            direct,
            pitch: (src.pitch.max(0.0) * shift) as f64,
        }
    }
}

/// Attenuation for a source `distance` units away under `model`
pub(crate) fn distance_gain(
    model: DistanceModel,
    distance: f32,
    reference: f32,
    max: f32,
    rolloff: f32,
) -> f32 {
    let clamp = |d: f32| d.clamp(reference, max.max(reference));
    let gain = match model {
        DistanceModel::None => 1.0,
        DistanceModel::Inverse | DistanceModel::InverseClamped => {
            let d = if model == DistanceModel::InverseClamped {
                clamp(distance)
            } else {
                distance
            };
            let denom = reference + rolloff * (d - reference);
            if reference <= 0.0 || denom <= 0.0 {
                1.0
            } else {
                reference / denom
            }
        }
        DistanceModel::Linear | DistanceModel::LinearClamped => {
            let d = if model == DistanceModel::LinearClamped {
                clamp(distance)
            } else {
                distance.min(max)
            };
            if max <= reference {
                1.0
            } else {
                1.0 - rolloff * (d - reference) / (max - reference)
            }
        }
        DistanceModel::Exponent | DistanceModel::ExponentClamped => {
            let d = if model == DistanceModel::ExponentClamped {
                clamp(distance)
            } else {
                distance
            };
            if reference <= 0.0 || d <= 0.0 {
                1.0
            } else {
                (d / reference).powf(-rolloff)
            }
        }
    };
    gain.clamp(0.0, 1.0)
}

/// Pitch multiplier from relative motion along the source-listener line.
///
/// `source_to_listener` points from the source at the listener.
pub(crate) fn doppler_shift(
    source_to_listener: Vec3,
    listener_velocity: Vec3,
    source_velocity: Vec3,
    factor: f32,
    speed_of_sound: f32,
) -> f32 {
    let distance = source_to_listener.length();
    if factor <= 0.0 || speed_of_sound <= 0.0 || distance <= f32::EPSILON {
        return 1.0;
    }
    let dir = source_to_listener * (1.0 / distance);
    let limit = speed_of_sound / factor;
    let vls = listener_velocity.dot(dir).min(limit);
    let vss = source_velocity.dot(dir).min(limit);

    let denom = (speed_of_sound - factor * vss).max(f32::EPSILON);
    ((speed_of_sound - factor * vls) / denom).max(0.0)
}

fn lock(state: &Mutex<MixerState>) -> MutexGuard<'_, MixerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Render side of the software mixer, handed to the output device
#[derive(Clone)]
pub struct MixerHandle {
    state: Arc<Mutex<MixerState>>,
}

impl MixerHandle {
    /// Mix every playing source into interleaved stereo `out`
    pub fn render(&self, out: &mut [f32]) {
        lock(&self.state).mix(out);
    }

    pub fn output_rate(&self) -> u32 {
        lock(&self.state).output_rate
    }

    pub fn set_output_rate(&self, rate: u32) {
        lock(&self.state).output_rate = rate.max(1);
    }

    pub fn speaker_layout(&self) -> SpeakerLayout {
        lock(&self.state).speaker_layout
    }
}

/// Software implementation of [`AudioBackend`]
pub struct SoftwareBackend {
    state: Arc<Mutex<MixerState>>,
}

impl SoftwareBackend {
    pub fn new(output_rate: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MixerState::new(output_rate))),
        }
    }

    pub fn mixer(&self) -> MixerHandle {
        MixerHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn with_source<F: FnOnce(&mut MixSource)>(&mut self, source: SourceId, f: F) {
        if let Some(src) = lock(&self.state).sources.get_mut(&source) {
            f(src);
        }
    }
}

impl AudioBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn create_source(&mut self) -> Result<SourceId, BackendError> {
        let mut state = lock(&self.state);
        let id = state.next_id();
        state.sources.insert(id, MixSource::default());
        Ok(id)
    }

    fn destroy_source(&mut self, source: SourceId) {
        lock(&self.state).sources.remove(&source);
    }

    fn create_buffer(&mut self) -> Result<BufferId, BackendError> {
        let mut state = lock(&self.state);
        let id = state.next_id();
        state.buffers.insert(id, MixBuffer::decode(BufferFormat::Mono16, &[], 1));
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        lock(&self.state).buffers.remove(&buffer);
    }

    fn upload(
        &mut self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<(), BackendError> {
        if sample_rate == 0 {
            return Err(BackendError::InvalidUpload("sample rate is zero".to_string()));
        }
        let mut state = lock(&self.state);
        let slot = state
            .buffers
            .get_mut(&buffer)
            .ok_or(BackendError::UnknownBuffer { id: buffer })?;
        *slot = MixBuffer::decode(format, data, sample_rate);
        Ok(())
    }

    fn set_source(&mut self, source: SourceId, param: SourceParam) {
        self.with_source(source, |src| match param {
            SourceParam::Gain(gain) => src.gain = gain.max(0.0),
            SourceParam::Pitch(pitch) => src.pitch = pitch.max(0.0),
            SourceParam::Looping(looping) => src.looping = looping,
            SourceParam::Position(position) => src.position = position,
            SourceParam::Velocity(velocity) => src.velocity = velocity,
            SourceParam::ReferenceDistance(distance) => src.reference_distance = distance.max(0.0),
            SourceParam::MaxDistance(distance) => src.max_distance = distance.max(0.0),
            SourceParam::RolloffFactor(rolloff) => src.rolloff = rolloff.max(0.0),
            SourceParam::Relative(relative) => src.relative = relative,
        });
    }

    fn attach_buffer(&mut self, source: SourceId, buffer: Option<BufferId>) {
        self.with_source(source, |src| {
            src.queue.clear();
            src.queue.extend(buffer);
            src.state = SourceState::Initial;
            src.current = 0;
            src.cursor = 0.0;
            src.pending_offset = None;
        });
    }

    fn play(&mut self, source: SourceId) {
        let mut state = lock(&self.state);
        let pending = match state.sources.get_mut(&source) {
            Some(src) if src.state == SourceState::Paused => {
                src.state = SourceState::Playing;
                return;
            }
            Some(src) => {
                src.current = 0;
                src.cursor = 0.0;
                src.state = if src.queue.is_empty() {
                    SourceState::Stopped
                } else {
                    SourceState::Playing
                };
                src.pending_offset.take()
            }
            None => return,
        };
        if let Some(offset) = pending {
            state.seek(source, offset);
        }
    }

    fn pause(&mut self, source: SourceId) {
        self.with_source(source, |src| {
            if src.state == SourceState::Playing {
                src.state = SourceState::Paused;
            }
        });
    }

    fn stop(&mut self, source: SourceId) {
        self.with_source(source, |src| {
            src.state = SourceState::Stopped;
            src.current = src.queue.len();
            src.cursor = 0.0;
            src.pending_offset = None;
        });
    }

    fn rewind(&mut self, source: SourceId) {
        self.with_source(source, |src| {
            src.state = SourceState::Initial;
            src.current = 0;
            src.cursor = 0.0;
        });
    }

    fn source_state(&self, source: SourceId) -> SourceState {
        lock(&self.state)
            .sources
            .get(&source)
            .map_or(SourceState::Stopped, |src| src.state)
    }

    fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        if let Some(missing) = buffers.iter().find(|id| !state.buffers.contains_key(id)) {
            return Err(BackendError::UnknownBuffer { id: *missing });
        }
        let src = state
            .sources
            .get_mut(&source)
            .ok_or(BackendError::UnknownSource { id: source })?;
        src.queue.extend(buffers.iter().copied());
        Ok(())
    }

    fn unqueue_buffers(&mut self, source: SourceId, count: usize) -> Vec<BufferId> {
        let mut state = lock(&self.state);
        let Some(src) = state.sources.get_mut(&source) else {
            return Vec::new();
        };
        let processed = match src.state {
            SourceState::Initial => 0,
            _ => src.current.min(src.queue.len()),
        };
        let take = count.min(processed);
        src.current -= take;
        src.queue.drain(..take).collect()
    }

    fn buffers_queued(&self, source: SourceId) -> usize {
        lock(&self.state).sources.get(&source).map_or(0, |src| src.queue.len())
    }

    fn buffers_processed(&self, source: SourceId) -> usize {
        lock(&self.state).sources.get(&source).map_or(0, |src| match src.state {
            SourceState::Initial => 0,
            _ => src.current.min(src.queue.len()),
        })
    }

    fn byte_offset(&self, source: SourceId) -> u64 {
        let state = lock(&self.state);
        let Some(src) = state.sources.get(&source) else {
            return 0;
        };
        if !matches!(src.state, SourceState::Playing | SourceState::Paused) {
            return 0;
        }
        let before: u64 = src.queue.iter().take(src.current).map(|id| state.bytes_in(*id)).sum();
        let within = src
            .queue
            .get(src.current)
            .and_then(|id| state.buffers.get(id))
            .map_or(0, |b| src.cursor as u64 * b.format.bytes_per_frame() as u64);
        before + within
    }

    fn set_byte_offset(&mut self, source: SourceId, offset: u64) {
        let mut state = lock(&self.state);
        let Some(src) = state.sources.get_mut(&source) else {
            return;
        };
        match src.state {
            SourceState::Playing | SourceState::Paused => state.seek(source, PendingOffset::Bytes(offset)),
            _ => src.pending_offset = Some(PendingOffset::Bytes(offset)),
        }
    }

    fn sec_offset(&self, source: SourceId) -> f32 {
        let state = lock(&self.state);
        let Some(src) = state.sources.get(&source) else {
            return 0.0;
        };
        if !matches!(src.state, SourceState::Playing | SourceState::Paused) {
            return 0.0;
        }
        let seconds_of = |id: &BufferId| {
            state
                .buffers
                .get(id)
                .map_or(0.0, |b| b.frames as f32 / b.sample_rate as f32)
        };
        let before: f32 = src.queue.iter().take(src.current).map(seconds_of).sum();
        let within = src
            .queue
            .get(src.current)
            .and_then(|id| state.buffers.get(id))
            .map_or(0.0, |b| src.cursor as f32 / b.sample_rate as f32);
        before + within
    }

    fn set_sec_offset(&mut self, source: SourceId, seconds: f32) {
        let seconds = seconds.max(0.0);
        let mut state = lock(&self.state);
        let Some(src) = state.sources.get_mut(&source) else {
            return;
        };
        match src.state {
            SourceState::Playing | SourceState::Paused => state.seek(source, PendingOffset::Seconds(seconds)),
            _ => src.pending_offset = Some(PendingOffset::Seconds(seconds)),
        }
    }

    fn set_listener_position(&mut self, position: Vec3) {
        lock(&self.state).listener.position = position;
    }

    fn set_listener_velocity(&mut self, velocity: Vec3) {
        lock(&self.state).listener.velocity = velocity;
    }

    fn set_listener_orientation(&mut self, forward: Vec3, up: Vec3) {
        let mut state = lock(&self.state);
        state.listener.forward = forward;
        state.listener.up = up;
    }

    fn set_listener_gain(&mut self, gain: f32) {
        lock(&self.state).listener.gain = gain.max(0.0);
    }

    fn set_doppler_factor(&mut self, factor: f32) {
        lock(&self.state).doppler_factor = factor.max(0.0);
    }

    fn set_speed_of_sound(&mut self, speed: f32) {
        if speed > 0.0 {
            lock(&self.state).speed_of_sound = speed;
        }
    }

    fn set_distance_model(&mut self, model: DistanceModel) {
        lock(&self.state).distance_model = model;
    }

    fn set_speaker_layout(&mut self, layout: SpeakerLayout) {
        lock(&self.state).speaker_layout = layout;
    }
}
