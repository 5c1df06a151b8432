#[cfg(test)]
mod integration_tests {
    use crate::audio::{
        encode_pcm_wav, parse_wav, AudioSystem, CallbackFileSystem, FileToken, MixerHandle, NullBackend,
        SampleHandle, SoftwareBackend,
    };
    use crate::config::{ConfigManager, EngineConfig};
    use crate::error::{AudioError, WavError};
    use crate::models::{MsPosition, PlaybackStatus, SlotKind, StatusReporting, Vec3};
    use std::collections::HashMap;
    use std::io::{self, SeekFrom, Write};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::{NamedTempFile, TempDir};

    const RATE: u32 = 22050;

    /// Mono 16-bit PCM holding a constant positive level
    fn level_pcm(frames: usize, value: i16) -> Vec<u8> {
        (0..frames).flat_map(|_| value.to_le_bytes()).collect()
    }

    fn mono_wav(frames: usize) -> Vec<u8> {
        encode_pcm_wav(1, RATE, 16, &level_pcm(frames, 12000))
    }

    fn wav_on_disk(frames: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&mono_wav(frames)).unwrap();
        file.flush().unwrap();
        file
    }

    fn path_of(file: &NamedTempFile) -> String {
        file.path().to_string_lossy().to_string()
    }

    /// Software-mixed system with the smallest stream ring
    fn mixed_system(config: EngineConfig) -> (AudioSystem, MixerHandle) {
        let backend = SoftwareBackend::new(RATE);
        let mixer = backend.mixer();
        let config = EngineConfig {
            stream_buffer_count: 2,
            stream_buffer_size: 1024,
            ..config
        };
        (AudioSystem::with_backend(&config, Box::new(backend)), mixer)
    }

    /// Render `frames` stereo frames and return the (left, right) energy
    fn render(mixer: &MixerHandle, frames: usize) -> (f32, f32) {
        let mut out = vec![0.0f32; frames * 2];
        mixer.render(&mut out);
        out.chunks(2)
            .fold((0.0, 0.0), |(l, r), frame| (l + frame[0].abs(), r + frame[1].abs()))
    }

    /// Frames with any signal on either channel
    fn audible_frames(mixer: &MixerHandle, frames: usize) -> usize {
        let mut out = vec![0.0f32; frames * 2];
        mixer.render(&mut out);
        out.chunks(2).filter(|frame| frame[0] != 0.0 || frame[1] != 0.0).count()
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn test_pool_refuses_one_past_capacity() {
        let config = EngineConfig {
            max_2d_samples: 3,
            max_3d_samples: 2,
            ..EngineConfig::default()
        };
        let (system, _mixer) = mixed_system(config);

        let samples: Vec<_> = (0..3).map(|_| system.allocate_sample().unwrap()).collect();
        assert!(matches!(
            system.allocate_sample(),
            Err(AudioError::PoolExhausted {
                kind: SlotKind::Sample2D,
                capacity: 3
            })
        ));

        let _a = system.allocate_3d_sample().unwrap();
        let _b = system.allocate_3d_sample().unwrap();
        assert!(matches!(
            system.allocate_3d_sample(),
            Err(AudioError::PoolExhausted {
                kind: SlotKind::Sample3D,
                capacity: 2
            })
        ));

        system.release_sample(samples[1]);
        let reused = system.allocate_sample().unwrap();
        assert_eq!(reused.index(), samples[1].index());
    }

    #[test]
    fn test_one_second_wav_loads_with_its_rate() {
        let bytes = mono_wav(RATE as usize);
        let sound = parse_wav(&bytes).unwrap();
        assert_eq!(sound.format.channels, 1);
        assert_eq!(sound.format.bits_per_sample, 16);
        assert_eq!(sound.sample_count(), Some(RATE));
        assert_eq!(sound.duration_ms(), 1000);

        let (system, _mixer) = mixed_system(EngineConfig::default());
        let handle = system.allocate_sample().unwrap();
        system.set_sample_file(handle, &bytes).unwrap();
        assert_eq!(system.sample_playback_rate(handle), RATE);
        assert_eq!(
            system.sample_ms_position(handle),
            MsPosition {
                total_ms: 1000,
                current_ms: 0
            }
        );
    }

    #[test]
    fn test_odd_sized_list_chunk_before_format() {
        let pcm = level_pcm(100, 500);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(b"abc\0");
        let canonical = encode_pcm_wav(1, RATE, 16, &pcm);
        bytes.extend_from_slice(&canonical[12..]);
        let riff_len = (bytes.len() - 8) as u32;
        bytes[4..8].copy_from_slice(&riff_len.to_le_bytes());

        let sound = parse_wav(&bytes).unwrap();
        assert_eq!(sound.format.sample_rate, RATE);
        assert_eq!(sound.data, &pcm[..]);

        let (system, _mixer) = mixed_system(EngineConfig::default());
        let handle = system.allocate_3d_sample().unwrap();
        system.set_3d_sample_file(handle, &bytes).unwrap();
        assert_eq!(system.sample_3d_length(handle), 100);
    }

    #[test]
    fn test_malformed_input_leaves_slot_untouched() {
        let (system, _mixer) = mixed_system(EngineConfig::default());
        let handle = system.allocate_sample().unwrap();
        system.set_sample_volume(handle, 90);

        assert!(matches!(parse_wav(b"RIFF\x04\0\0\0AVI "), Err(WavError::NotWave)));
        assert!(system.set_sample_file(handle, b"RIFF\x04\0\0\0AVI ").is_err());
        assert!(system.set_sample_file(handle, &mono_wav(10)[..30]).is_err());

        assert_eq!(system.sample_ms_position(handle), MsPosition::default());
        assert_eq!(system.sample_volume(handle), 90);
        assert_eq!(system.sample_status(handle), PlaybackStatus::Stopped);
        assert!(system.last_error().is_some());
    }

    #[test]
    fn test_failed_stream_open_does_not_hold_a_slot() {
        let config = EngineConfig {
            max_streams: 1,
            ..EngineConfig::default()
        };
        let (system, _mixer) = mixed_system(config);

        let mut garbage = NamedTempFile::new().unwrap();
        garbage.write_all(b"definitely not RIFF data").unwrap();
        assert!(system.open_stream(&path_of(&garbage)).is_err());

        let file = wav_on_disk(1000);
        assert!(system.open_stream(&path_of(&file)).is_ok());
    }

    #[test]
    fn test_stream_loop_count_three_plays_three_passes() {
        let file = wav_on_disk(1000);
        let (system, mixer) = mixed_system(EngineConfig::default());
        let handle = system.open_stream(&path_of(&file)).unwrap();
        system.set_stream_loop_count(handle, 3);
        system.start_stream(handle);

        let mut audible = 0;
        for _ in 0..40 {
            audible += audible_frames(&mixer, 256);
            system.service_stream(handle);
        }

        assert_eq!(system.stream_status(handle), PlaybackStatus::Done);
        assert_eq!(audible, 3 * 1000);
        let stats = system.logger().get_event_statistics();
        assert_eq!(stats.stream_loops, 2);
        assert_eq!(stats.stream_underruns, 0);
    }

    #[test]
    fn test_stream_loop_count_zero_keeps_playing() {
        let file = wav_on_disk(1000);
        let (system, mixer) = mixed_system(EngineConfig::default());
        let handle = system.open_stream(&path_of(&file)).unwrap();
        system.set_stream_loop_count(handle, 0);
        system.start_stream(handle);

        for _ in 0..60 {
            render(&mixer, 256);
            system.service_stream(handle);
        }
        assert_eq!(system.stream_status(handle), PlaybackStatus::Playing);
        assert!(system.logger().get_event_statistics().stream_loops >= 10);
    }

    #[test]
    fn test_underrun_restarts_looping_stream() {
        let file = wav_on_disk(1000);
        let (system, mixer) = mixed_system(EngineConfig::default());
        let handle = system.open_stream(&path_of(&file)).unwrap();
        system.set_stream_loop_count(handle, 0);
        system.start_stream(handle);

        render(&mixer, 2048);
        system.service_stream(handle);

        assert_eq!(system.stream_status(handle), PlaybackStatus::Playing);
        assert_eq!(system.logger().get_event_statistics().stream_underruns, 1);
        let (left, right) = render(&mixer, 64);
        assert!(left > 0.0 && right > 0.0);
    }

    #[test]
    fn test_exhausted_single_pass_stream_finishes() {
        let file = wav_on_disk(1000);
        let (system, mixer) = mixed_system(EngineConfig::default());
        let handle = system.open_stream(&path_of(&file)).unwrap();
        system.start_stream(handle);

        render(&mixer, 2048);
        system.service_stream(handle);

        assert_eq!(system.stream_status(handle), PlaybackStatus::Done);
        assert_eq!(system.logger().get_event_statistics().stream_underruns, 0);
        assert_eq!(system.stream_ms_position(handle).current_ms, 45);
    }

    #[test]
    fn test_pan_reaches_the_mixer() {
        let (system, mixer) = mixed_system(EngineConfig::default());
        let bytes = mono_wav(4096);

        let left = system.allocate_sample().unwrap();
        system.set_sample_file(left, &bytes).unwrap();
        system.set_sample_pan(left, 0);
        system.start_sample(left);
        let (l, r) = render(&mixer, 256);
        assert!(l > r * 2.0);
        system.end_sample(left);

        let right = system.allocate_sample().unwrap();
        system.set_sample_file(right, &bytes).unwrap();
        system.set_sample_pan(right, 127);
        system.start_sample(right);
        let (l, r) = render(&mixer, 256);
        assert!(r > l * 2.0);
        system.end_sample(right);

        let center = system.allocate_sample().unwrap();
        system.set_sample_file(center, &bytes).unwrap();
        system.start_sample(center);
        let (l, r) = render(&mixer, 256);
        assert!((l - r).abs() < l * 0.01);
    }

    #[test]
    fn test_positional_sample_follows_listener_axes() {
        let (system, mixer) = mixed_system(EngineConfig::default());
        let handle = system.allocate_3d_sample().unwrap();
        system.set_3d_sample_file(handle, &mono_wav(4096)).unwrap();
        system.set_3d_sample_position(handle, Vec3::new(5.0, 0.0, 0.0));
        system.start_3d_sample(handle);

        let (l, r) = render(&mixer, 256);
        assert!(r > l * 2.0);

        // Facing +z swaps the listener's left and right
        system.set_listener_orientation(Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 1.0, 0.0));
        let (l, r) = render(&mixer, 256);
        assert!(l > r * 2.0);
    }

    #[test]
    fn test_stale_handles_never_reach_new_occupant() {
        let (system, _mixer) = mixed_system(EngineConfig::default());
        let old = system.allocate_sample().unwrap();
        system.set_sample_user_data(old, 0, 7);
        system.release_sample(old);
        system.release_sample(old);

        let new = system.allocate_sample().unwrap();
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);

        system.set_sample_volume(old, 5);
        system.release_sample(old);
        assert_eq!(system.sample_status(old), PlaybackStatus::Free);
        assert_eq!(system.sample_status(new), PlaybackStatus::Stopped);
        assert_eq!(system.sample_volume(new), 127);
        assert_eq!(system.sample_user_data(new, 0), 0);

        assert_eq!(system.sample_status(SampleHandle::INVALID), PlaybackStatus::Free);
    }

    #[test]
    fn test_paused_status_depends_on_reporting_mode() {
        let (system, _mixer) = mixed_system(EngineConfig::default());
        let handle = system.allocate_sample().unwrap();
        system.set_sample_file(handle, &mono_wav(RATE as usize)).unwrap();
        system.start_sample(handle);
        system.stop_sample(handle);

        assert_eq!(system.status_reporting(), StatusReporting::Legacy);
        assert_eq!(system.sample_status(handle), PlaybackStatus::Stopped);

        system.set_status_reporting(StatusReporting::Distinct);
        assert_eq!(system.sample_status(handle), PlaybackStatus::Paused);

        system.resume_sample(handle);
        assert_eq!(system.sample_status(handle), PlaybackStatus::Playing);
    }

    #[test]
    fn test_timer_fires_through_audio_system() {
        let system = AudioSystem::with_backend(&EngineConfig::default(), Box::new(NullBackend::new()));
        let ticks = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(AtomicU32::new(0));

        let timer = {
            let ticks = Arc::clone(&ticks);
            let seen = Arc::clone(&seen);
            system
                .register_timer(move |value| {
                    seen.store(value, Ordering::SeqCst);
                    ticks.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        };
        system.set_timer_user_data(timer, 99);
        system.set_timer_period(timer, 1_000);
        system.start_timer(timer).unwrap();

        assert!(wait_for(|| ticks.load(Ordering::SeqCst) >= 5));
        assert_eq!(seen.load(Ordering::SeqCst), 99);

        system.stop_timer(timer);
        let stopped_at = ticks.load(Ordering::SeqCst);
        system.delay(20);
        assert_eq!(ticks.load(Ordering::SeqCst), stopped_at);
        system.release_timer(timer);
    }

    #[test]
    fn test_timer_services_stream_to_completion() {
        let file = wav_on_disk(1000);
        let (system, mixer) = mixed_system(EngineConfig::default());
        let system = Arc::new(system);
        let handle = system.open_stream(&path_of(&file)).unwrap();

        let weak = Arc::downgrade(&system);
        let timer = system
            .register_timer(move |_| {
                if let Some(system) = weak.upgrade() {
                    system.service_stream(handle);
                }
            })
            .unwrap();
        system.set_timer_period(timer, 1_000);
        system.start_timer(timer).unwrap();
        system.start_stream(handle);

        assert!(wait_for(|| {
            render(&mixer, 128);
            system.stream_status(handle) == PlaybackStatus::Done
        }));
        system.release_timer(timer);
    }

    #[test]
    fn test_stream_through_callback_file_system() {
        let archive: Arc<HashMap<String, Vec<u8>>> =
            Arc::new(HashMap::from([("sfx/engine.wav".to_string(), mono_wav(1000))]));
        let cursors: Arc<Mutex<HashMap<FileToken, (String, u64)>>> = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicUsize::new(0));
        let next_token = Arc::new(AtomicU32::new(1));

        let file_system = {
            let open_archive = Arc::clone(&archive);
            let open_cursors = Arc::clone(&cursors);
            let close_cursors = Arc::clone(&cursors);
            let close_count = Arc::clone(&closed);
            let seek_archive = Arc::clone(&archive);
            let seek_cursors = Arc::clone(&cursors);
            let read_archive = Arc::clone(&archive);
            let read_cursors = Arc::clone(&cursors);

            CallbackFileSystem::new(
                move |path| {
                    if !open_archive.contains_key(path) {
                        return Err(io::Error::new(io::ErrorKind::NotFound, path.to_string()));
                    }
                    let token = next_token.fetch_add(1, Ordering::SeqCst) as FileToken;
                    open_cursors.lock().unwrap().insert(token, (path.to_string(), 0));
                    Ok(token)
                },
                move |token| {
                    close_cursors.lock().unwrap().remove(&token);
                    close_count.fetch_add(1, Ordering::SeqCst);
                },
                move |token, pos| {
                    let mut cursors = seek_cursors.lock().unwrap();
                    let (path, cursor) = cursors.get_mut(&token).unwrap();
                    let len = seek_archive[path.as_str()].len() as i64;
                    let target = match pos {
                        SeekFrom::Start(n) => n as i64,
                        SeekFrom::End(n) => len + n,
                        SeekFrom::Current(n) => *cursor as i64 + n,
                    };
                    *cursor = target.max(0) as u64;
                    Ok(*cursor)
                },
                move |token, buf| {
                    let mut cursors = read_cursors.lock().unwrap();
                    let (path, cursor) = cursors.get_mut(&token).unwrap();
                    let data = &read_archive[path.as_str()];
                    let start = (*cursor as usize).min(data.len());
                    let n = buf.len().min(data.len() - start);
                    buf[..n].copy_from_slice(&data[start..start + n]);
                    *cursor += n as u64;
                    Ok(n)
                },
            )
        };

        let (system, mixer) = mixed_system(EngineConfig::default());
        system.set_file_system(Arc::new(file_system));

        assert!(matches!(
            system.open_stream("sfx/missing.wav"),
            Err(AudioError::FileIo { .. })
        ));

        let handle = system.open_stream("sfx/engine.wav").unwrap();
        assert_eq!(system.stream_ms_position(handle).total_ms, 45);
        system.start_stream(handle);
        let (l, r) = render(&mixer, 128);
        assert!(l > 0.0 && r > 0.0);

        system.close_stream(handle);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(cursors.lock().unwrap().is_empty());
    }

    #[test]
    fn test_shutdown_then_drop_is_clean() {
        let file = wav_on_disk(1000);
        let (system, _mixer) = mixed_system(EngineConfig::default());
        let sample = system.allocate_sample().unwrap();
        let stream = system.open_stream(&path_of(&file)).unwrap();
        system.start_stream(stream);
        let timer = system.register_timer(|_| {}).unwrap();
        system.start_timer(timer).unwrap();

        system.shutdown();
        assert_eq!(system.sample_status(sample), PlaybackStatus::Free);
        assert_eq!(system.stream_status(stream), PlaybackStatus::Free);
        assert!(matches!(
            system.open_stream(&path_of(&file)),
            Err(AudioError::InitializationFailed(_))
        ));
        drop(system);
    }

    #[test]
    fn test_saved_config_sizes_the_pools() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut manager = ConfigManager::with_path(path.clone()).unwrap();
        manager
            .update_config(|config| {
                config.max_2d_samples = 1;
                config.status_reporting = StatusReporting::Distinct;
            })
            .unwrap();

        let reloaded = ConfigManager::with_path(path).unwrap();
        let system = AudioSystem::with_backend(reloaded.get_config(), Box::new(NullBackend::new()));
        assert_eq!(system.status_reporting(), StatusReporting::Distinct);
        assert!(system.allocate_sample().is_ok());
        assert!(system.allocate_sample().is_err());
    }
}
