//! Playback state shared by every sample and stream slot.

use crate::audio::backend::{AudioBackend, SourceId, SourceParam, SourceState};
use crate::models::{
    clamp_volume, volume_to_gain, MsPosition, PlaybackStatus, StatusReporting, DEFAULT_PLAYBACK_RATE,
    USER_DATA_SLOTS, VOLUME_MAX,
};

/// Translate a hardware play state into the status callers see.
///
/// A source that was never started or was rewound by `end` is
/// `Stopped`; one that ran off the end of its data is `Done`.
pub fn report_status(state: SourceState, mode: StatusReporting) -> PlaybackStatus {
    match state {
        SourceState::Playing => PlaybackStatus::Playing,
        SourceState::Paused => match mode {
            StatusReporting::Legacy => PlaybackStatus::Stopped,
            StatusReporting::Distinct => PlaybackStatus::Paused,
        },
        SourceState::Initial => PlaybackStatus::Stopped,
        SourceState::Stopped => PlaybackStatus::Done,
    }
}

/// One hardware source plus the per-slot settings that drive it
#[derive(Debug)]
pub(crate) struct Voice {
    pub source: SourceId,
    pub volume: i32,
    pub loop_count: u32,
    pub playback_rate: u32,
    /// Sample rate of the loaded data; pitch 1.0
    pub base_rate: u32,
    user_data: [i32; USER_DATA_SLOTS],
    paused: bool,
}

impl Voice {
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            volume: VOLUME_MAX,
            loop_count: 1,
            playback_rate: DEFAULT_PLAYBACK_RATE,
            base_rate: 0,
            user_data: [0; USER_DATA_SLOTS],
            paused: false,
        }
    }

    /// Back to allocation defaults, keeping the source and user data
    pub fn reset(&mut self) {
        self.volume = VOLUME_MAX;
        self.loop_count = 1;
        self.playback_rate = DEFAULT_PLAYBACK_RATE;
        self.base_rate = 0;
        self.paused = false;
    }

    pub fn gain(&self) -> f32 {
        volume_to_gain(self.volume)
    }

    /// Pitch multiplier `rate / base_rate`, 1.0 until data is loaded
    pub fn pitch(&self) -> f32 {
        if self.base_rate == 0 {
            1.0
        } else {
            self.playback_rate as f32 / self.base_rate as f32
        }
    }

    pub fn set_volume(&mut self, backend: &mut dyn AudioBackend, volume: i32) {
        self.volume = clamp_volume(volume);
        backend.set_source(self.source, SourceParam::Gain(self.gain()));
    }

    pub fn set_playback_rate(&mut self, backend: &mut dyn AudioBackend, rate: u32) {
        self.playback_rate = rate;
        backend.set_source(self.source, SourceParam::Pitch(self.pitch()));
    }

    /// Zero loops forever. Only single-buffer sources loop in hardware.
    pub fn set_loop_count(&mut self, backend: &mut dyn AudioBackend, count: u32, hardware_loop: bool) {
        self.loop_count = count;
        if hardware_loop {
            backend.set_source(self.source, SourceParam::Looping(count == 0));
        }
    }

    /// Push gain, pitch and (optionally) the looping flag to the source
    pub fn apply(&self, backend: &mut dyn AudioBackend, hardware_loop: bool) {
        backend.set_source(self.source, SourceParam::Gain(self.gain()));
        backend.set_source(self.source, SourceParam::Pitch(self.pitch()));
        if hardware_loop {
            backend.set_source(self.source, SourceParam::Looping(self.loop_count == 0));
        }
    }

    pub fn play(&mut self, backend: &mut dyn AudioBackend) {
        self.paused = false;
        backend.play(self.source);
    }

    /// Pause a playing source; anything else is left alone
    pub fn stop(&mut self, backend: &mut dyn AudioBackend) {
        if backend.source_state(self.source) == SourceState::Playing {
            backend.pause(self.source);
            self.paused = true;
        }
    }

    /// Continue after `stop`, without re-applying parameters
    pub fn resume(&mut self, backend: &mut dyn AudioBackend) {
        if self.paused {
            self.paused = false;
            backend.play(self.source);
        }
    }

    /// Halt and rewind to the start
    pub fn end(&mut self, backend: &mut dyn AudioBackend) {
        self.paused = false;
        backend.stop(self.source);
        backend.rewind(self.source);
    }

    pub fn status(&self, backend: &dyn AudioBackend, mode: StatusReporting) -> PlaybackStatus {
        report_status(backend.source_state(self.source), mode)
    }

    pub fn ms_position(&self, backend: &dyn AudioBackend, total_samples: u32) -> MsPosition {
        if self.base_rate == 0 {
            return MsPosition::default();
        }
        let total_ms = (total_samples as u64 * 1000 / self.base_rate as u64) as u32;
        let current_ms = ((backend.sec_offset(self.source) * 1000.0) as u32).min(total_ms);
        MsPosition { total_ms, current_ms }
    }

    pub fn set_ms_position(&self, backend: &mut dyn AudioBackend, ms: u32) {
        backend.set_sec_offset(self.source, ms as f32 / 1000.0);
    }

    pub fn set_user_data(&mut self, index: usize, value: i32) {
        if let Some(slot) = self.user_data.get_mut(index) {
            *slot = value;
        }
    }

    /// Zero for an out-of-range index
    pub fn user_data(&self, index: usize) -> i32 {
        self.user_data.get(index).copied().unwrap_or(0)
    }
}
