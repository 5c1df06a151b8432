//! Output device plumbing: enumeration plus the cpal stream that pulls
//! frames from the software mixer.

use crate::audio::backend::MixerHandle;
use crate::error::BackendError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat, Stream, StreamConfig, SupportedStreamConfig};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Summary of one output device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub max_channels: u16,
    pub default_sample_rate: u32,
    pub supported_sample_rates: Vec<u32>,
}

/// Enumerates output devices on the default host
pub struct DeviceManager {
    host: Host,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    pub fn host_name(&self) -> &'static str {
        self.host.id().name()
    }

    /// Describe every output device that answers a config query
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, BackendError> {
        let default_name = self
            .host
            .default_output_device()
            .and_then(|device| device.name().ok());

        let devices = self
            .host
            .output_devices()
            .map_err(|e| BackendError::DeviceUnavailable(format!("Failed to enumerate devices: {}", e)))?;

        let mut infos = Vec::new();
        for device in devices {
            match Self::describe(&device) {
                Ok(mut info) => {
                    info.is_default = default_name.as_deref() == Some(info.name.as_str());
                    infos.push(info);
                }
                Err(e) => debug!("Skipping output device: {}", e),
            }
        }
        Ok(infos)
    }

    /// Find a device by exact name, or the host default for `None`
    pub fn find_device(&self, name: Option<&str>) -> Result<Device, BackendError> {
        match name {
            Some(wanted) => {
                let mut devices = self
                    .host
                    .output_devices()
                    .map_err(|e| BackendError::DeviceUnavailable(format!("Cannot search for {}: {}", wanted, e)))?;
                devices
                    .find(|device| device.name().map(|n| n == wanted).unwrap_or(false))
                    .ok_or_else(|| BackendError::DeviceUnavailable(format!("Device not found: {}", wanted)))
            }
            None => self
                .host
                .default_output_device()
                .ok_or_else(|| BackendError::DeviceUnavailable("No default output device available".to_string())),
        }
    }

    fn describe(device: &Device) -> Result<DeviceInfo, BackendError> {
        let name = device
            .name()
            .map_err(|e| BackendError::DeviceUnavailable(format!("Failed to get device name: {}", e)))?;
        let default_config = device
            .default_output_config()
            .map_err(|e| BackendError::DeviceUnavailable(format!("No default config for {}: {}", name, e)))?;

        let mut rates = Vec::new();
        let mut max_channels = default_config.channels();
        if let Ok(ranges) = device.supported_output_configs() {
            for range in ranges {
                max_channels = max_channels.max(range.channels());
                for &rate in &[11025, 22050, 44100, 48000, 96000] {
                    if rate >= range.min_sample_rate().0 && rate <= range.max_sample_rate().0 && !rates.contains(&rate) {
                        rates.push(rate);
                    }
                }
            }
        }
        rates.sort_unstable();

        Ok(DeviceInfo {
            name,
            is_default: false,
            max_channels,
            default_sample_rate: default_config.sample_rate().0,
            supported_sample_rates: rates,
        })
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick a config at `preferred_rate` when the device offers one, else its default
fn choose_config(device: &Device, preferred_rate: u32) -> Result<SupportedStreamConfig, BackendError> {
    if let Ok(ranges) = device.supported_output_configs() {
        let matching = ranges
            .filter(|range| {
                matches!(range.sample_format(), SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
                    && range.channels() >= 1
                    && range.min_sample_rate().0 <= preferred_rate
                    && range.max_sample_rate().0 >= preferred_rate
            })
            .max_by_key(|range| (range.channels() == 2, range.sample_format() == SampleFormat::F32));
        if let Some(range) = matching {
            return Ok(range.with_sample_rate(cpal::SampleRate(preferred_rate)));
        }
    }
    device
        .default_output_config()
        .map_err(|e| BackendError::DeviceUnavailable(format!("No usable output config: {}", e)))
}

/// Raise the calling thread's scheduling priority where the platform allows.
pub(crate) fn raise_thread_priority() {
    #[cfg(target_os = "macos")]
    {
        unsafe {
            let thread = libc::pthread_self();
            let mut policy: libc::c_int = 0;
            let mut param: libc::sched_param = std::mem::zeroed();

            if libc::pthread_getschedparam(thread, &mut policy, &mut param) == 0 {
                param.sched_priority = 63;
                let _ = libc::pthread_setschedparam(thread, libc::SCHED_FIFO, &param);
            }
        }
    }
}

/// A running cpal output stream fed by the software mixer.
///
/// cpal streams are not `Send`, so the stream lives on its own
/// `audio-output` thread for its whole life.
pub struct OutputDevice {
    device_name: String,
    sample_rate: u32,
    is_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl OutputDevice {
    /// Open `device_name` (or the default device) and start pulling from `mixer`.
    pub fn start(mixer: MixerHandle, device_name: Option<&str>, preferred_rate: u32) -> Result<Self, BackendError> {
        let is_running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(String, u32), BackendError>>();
        let wanted = device_name.map(str::to_string);
        let running = Arc::clone(&is_running);

        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                raise_thread_priority();

                let stream = match Self::open_stream(&mixer, wanted.as_deref(), preferred_rate) {
                    Ok((stream, name, rate)) => {
                        let _ = ready_tx.send(Ok((name, rate)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                let _ = stream.pause();
            })
            .map_err(|e| BackendError::StreamBuildFailed(format!("Failed to create audio thread: {}", e)))?;

        let ready = ready_rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| BackendError::StreamBuildFailed("Audio thread did not report readiness".to_string()));

        match ready.and_then(|result| result) {
            Ok((device_name, sample_rate)) => {
                info!("Audio output on '{}' at {} Hz", device_name, sample_rate);
                Ok(Self {
                    device_name,
                    sample_rate,
                    is_running,
                    thread: Some(thread),
                })
            }
            Err(e) => {
                is_running.store(false, Ordering::Relaxed);
                let _ = thread.join();
                Err(e)
            }
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open_stream(
        mixer: &MixerHandle,
        device_name: Option<&str>,
        preferred_rate: u32,
    ) -> Result<(Stream, String, u32), BackendError> {
        let manager = DeviceManager::new();
        let device = match manager.find_device(device_name) {
            Ok(device) => device,
            Err(e) if device_name.is_some() => {
                warn!("{}, using the default device", e);
                manager.find_device(None)?
            }
            Err(e) => return Err(e),
        };
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let supported = choose_config(&device, preferred_rate)?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        mixer.set_output_rate(config.sample_rate.0);

        let stream = match sample_format {
            SampleFormat::F32 => Self::create_audio_stream::<f32>(&device, &config, mixer),
            SampleFormat::I16 => Self::create_audio_stream::<i16>(&device, &config, mixer),
            SampleFormat::U16 => Self::create_audio_stream::<u16>(&device, &config, mixer),
            other => Err(BackendError::StreamBuildFailed(format!(
                "Unsupported sample format: {:?}",
                other
            ))),
        }?;

        stream
            .play()
            .map_err(|e| BackendError::StreamBuildFailed(format!("Failed to start audio stream: {}", e)))?;

        Ok((stream, name, config.sample_rate.0))
    }

    fn create_audio_stream<T>(device: &Device, config: &StreamConfig, mixer: &MixerHandle) -> Result<Stream, BackendError>
    where
        T: cpal::Sample + cpal::SizedSample + Send + 'static,
        T: cpal::FromSample<f32>,
    {
        let mixer = mixer.clone();
        let channels = config.channels as usize;
        let mut stereo: Vec<f32> = Vec::new();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels.max(1);
                    stereo.resize(frames * 2, 0.0);
                    mixer.render(&mut stereo);

                    for (frame, out) in data.chunks_mut(channels.max(1)).enumerate() {
                        let left = stereo[frame * 2];
                        let right = stereo[frame * 2 + 1];
                        if out.len() == 1 {
                            out[0] = cpal::Sample::from_sample((left + right) * 0.5);
                            continue;
                        }
                        for (channel, sample) in out.iter_mut().enumerate() {
                            let value = match channel {
                                0 => left,
                                1 => right,
                                _ => 0.0,
                            };
                            *sample = cpal::Sample::from_sample(value);
                        }
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| BackendError::StreamBuildFailed(format!("Failed to build output stream: {}", e)))
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
