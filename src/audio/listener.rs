//! The single listener every positional sound is heard from, plus the
//! device-wide attenuation settings.

use crate::audio::backend::{AudioBackend, SourceParam};
use crate::audio::system::AudioSystem;
use crate::config::EngineConfig;
use crate::models::{DistanceModel, SpeakerLayout, Vec3, SPEED_OF_SOUND};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    pub velocity: Vec3,
    /// Linear gain over the whole mix, 0.0..=1.0
    pub master_volume: f32,
    pub doppler_factor: f32,
    /// World units per meter; scales the speed of sound
    pub distance_factor: f32,
    /// Applied to every 3D source
    pub rolloff_factor: f32,
    pub speaker_layout: SpeakerLayout,
    pub distance_model: DistanceModel,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            forward: Vec3::new(0.0, 0.0, -1.0),
            up: Vec3::new(0.0, 1.0, 0.0),
            velocity: Vec3::ZERO,
            master_volume: 1.0,
            doppler_factor: 1.0,
            distance_factor: 1.0,
            rolloff_factor: 1.0,
            speaker_layout: SpeakerLayout::default(),
            distance_model: DistanceModel::default(),
        }
    }
}

impl Listener {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            master_volume: config.master_volume.clamp(0.0, 1.0),
            speaker_layout: config.speaker_layout,
            distance_model: config.distance_model,
            ..Self::default()
        }
    }

    pub fn speed_of_sound(&self) -> f32 {
        SPEED_OF_SOUND * self.distance_factor
    }

    /// Push every listener-global setting to the backend
    pub(crate) fn apply(&self, backend: &mut dyn AudioBackend) {
        backend.set_listener_position(self.position);
        backend.set_listener_velocity(self.velocity);
        backend.set_listener_orientation(self.forward, self.up);
        backend.set_listener_gain(self.master_volume);
        backend.set_doppler_factor(self.doppler_factor);
        backend.set_speed_of_sound(self.speed_of_sound());
        backend.set_distance_model(self.distance_model);
        backend.set_speaker_layout(self.speaker_layout);
    }
}

impl AudioSystem {
    /// Snapshot of the current listener settings
    pub fn listener(&self) -> Listener {
        self.lock().listener.clone()
    }

    pub fn set_listener_position(&self, position: Vec3) {
        let mut state = self.lock();
        state.listener.position = position;
        state.backend.set_listener_position(position);
    }

    pub fn listener_position(&self) -> Vec3 {
        self.lock().listener.position
    }

    pub fn set_listener_orientation(&self, forward: Vec3, up: Vec3) {
        let mut state = self.lock();
        state.listener.forward = forward;
        state.listener.up = up;
        state.backend.set_listener_orientation(forward, up);
    }

    /// `(forward, up)`
    pub fn listener_orientation(&self) -> (Vec3, Vec3) {
        let state = self.lock();
        (state.listener.forward, state.listener.up)
    }

    pub fn set_listener_velocity(&self, velocity: Vec3) {
        let mut state = self.lock();
        state.listener.velocity = velocity;
        state.backend.set_listener_velocity(velocity);
    }

    pub fn listener_velocity(&self) -> Vec3 {
        self.lock().listener.velocity
    }

    pub fn set_master_volume(&self, volume: f32) {
        let mut state = self.lock();
        state.listener.master_volume = volume.clamp(0.0, 1.0);
        let gain = state.listener.master_volume;
        state.backend.set_listener_gain(gain);
    }

    pub fn master_volume(&self) -> f32 {
        self.lock().listener.master_volume
    }

    pub fn set_doppler_factor(&self, factor: f32) {
        let mut state = self.lock();
        state.listener.doppler_factor = factor.max(0.0);
        let factor = state.listener.doppler_factor;
        state.backend.set_doppler_factor(factor);
    }

    pub fn doppler_factor(&self) -> f32 {
        self.lock().listener.doppler_factor
    }

    /// Scale the speed of sound to `343 * factor` world units per second.
    /// Non-positive factors are ignored.
    pub fn set_distance_factor(&self, factor: f32) {
        if !(factor.is_finite() && factor > 0.0) {
            return;
        }
        let mut state = self.lock();
        state.listener.distance_factor = factor;
        let speed = state.listener.speed_of_sound();
        state.backend.set_speed_of_sound(speed);
    }

    pub fn distance_factor(&self) -> f32 {
        self.lock().listener.distance_factor
    }

    /// Set the rolloff of every live 3D sound and of those allocated later
    pub fn set_rolloff_factor(&self, factor: f32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.listener.rolloff_factor = factor.max(0.0);
        let rolloff = state.listener.rolloff_factor;
        for sample in state.samples_3d.iter_mut() {
            state
                .backend
                .set_source(sample.voice.source, SourceParam::RolloffFactor(rolloff));
        }
    }

    pub fn rolloff_factor(&self) -> f32 {
        self.lock().listener.rolloff_factor
    }

    pub fn set_distance_model(&self, model: DistanceModel) {
        let mut state = self.lock();
        state.listener.distance_model = model;
        state.backend.set_distance_model(model);
    }

    pub fn distance_model(&self) -> DistanceModel {
        self.lock().listener.distance_model
    }

    pub fn set_speaker_layout(&self, layout: SpeakerLayout) {
        let mut state = self.lock();
        state.listener.speaker_layout = layout;
        state.backend.set_speaker_layout(layout);
    }

    pub fn speaker_layout(&self) -> SpeakerLayout {
        self.lock().listener.speaker_layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::NullBackend;

    fn system() -> AudioSystem {
        AudioSystem::with_backend(&EngineConfig::default(), Box::new(NullBackend::new()))
    }

    #[test]
    fn test_listener_defaults() {
        let listener = Listener::default();
        assert_eq!(listener.forward, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(listener.up, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(listener.speed_of_sound(), SPEED_OF_SOUND);
    }

    #[test]
    fn test_listener_from_config() {
        let config = EngineConfig {
            master_volume: 0.5,
            speaker_layout: SpeakerLayout::Surround51,
            ..EngineConfig::default()
        };
        let listener = Listener::from_config(&config);
        assert_eq!(listener.master_volume, 0.5);
        assert_eq!(listener.speaker_layout, SpeakerLayout::Surround51);
        assert_eq!(listener.doppler_factor, 1.0);
    }

    #[test]
    fn test_listener_setters_round_trip() {
        let system = system();
        system.set_listener_position(Vec3::new(1.0, 2.0, 3.0));
        system.set_listener_velocity(Vec3::new(0.0, 0.0, 5.0));
        system.set_listener_orientation(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0));

        assert_eq!(system.listener_position(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(system.listener_velocity(), Vec3::new(0.0, 0.0, 5.0));
        assert_eq!(system.listener_orientation().0, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_global_factors() {
        let system = system();
        system.set_distance_factor(2.0);
        assert_eq!(system.listener().speed_of_sound(), 686.0);

        system.set_distance_factor(0.0);
        assert_eq!(system.distance_factor(), 2.0);

        system.set_master_volume(3.0);
        assert_eq!(system.master_volume(), 1.0);

        system.set_doppler_factor(-1.0);
        assert_eq!(system.doppler_factor(), 0.0);

        system.set_rolloff_factor(0.25);
        assert_eq!(system.rolloff_factor(), 0.25);

        system.set_speaker_layout(SpeakerLayout::Quad);
        assert_eq!(system.speaker_layout(), SpeakerLayout::Quad);
    }
}
