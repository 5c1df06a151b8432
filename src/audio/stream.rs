//! File-backed streams played through a small ring of hardware buffers.
//!
//! `open_stream` primes every buffer of the ring, and `service_stream`
//! must then be called regularly (faster than one buffer's playing
//! time) to move played buffers back to the tail of the queue with the
//! next chunk of the file. Looping is done here, not in hardware: when a
//! pass runs out of bytes and another pass is allowed, the file is
//! rewound to the start of the PCM data.

use crate::audio::backend::{AudioBackend, BufferFormat, BufferId, SourceParam, SourceState};
use crate::audio::file_io::{AudioFile, FileSystem};
use crate::audio::pool::StreamHandle;
use crate::audio::state::{report_status, Voice};
use crate::audio::system::AudioSystem;
use crate::audio::wav::{read_wav_layout, WavLayout};
use crate::error::AudioError;
use crate::logging::{AudioLogger, OperationTimer};
use crate::models::{
    clamp_pan, pan_to_position, MsPosition, PlaybackStatus, StatusReporting, SlotKind, PAN_CENTER, VOLUME_MAX,
};
use log::warn;
use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Stopped,
    Playing,
    Paused,
    Done,
}

pub(crate) struct Stream {
    index: usize,
    pub voice: Voice,
    pub pan: i32,
    ring: Vec<BufferId>,
    /// Ring buffers not on the source queue, in refill order
    idle: VecDeque<BufferId>,
    /// Pass offset of the first byte of each queued buffer, head first
    queued_starts: VecDeque<u64>,
    file: Box<dyn AudioFile>,
    path: String,
    layout: WavLayout,
    format: BufferFormat,
    /// Read cursor within the current pass, 0..=data_len
    cursor: u64,
    loops_remaining: u32,
    state: StreamState,
    /// The queue already holds data from the current cursor; `start`
    /// plays it instead of rewinding
    primed_fresh: bool,
    scratch: Vec<u8>,
}

/// Fill `buf` from `reader`, stopping early only at end of file
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Open `path` and read its WAV header, leaving the file at the PCM data
fn open_stream_file(
    file_system: &dyn FileSystem,
    path: &str,
) -> Result<(Box<dyn AudioFile>, WavLayout, BufferFormat), AudioError> {
    let mut file = file_system.open(path).map_err(|source| AudioError::FileIo {
        path: path.to_string(),
        source,
    })?;
    let layout = read_wav_layout(&mut file)?;
    layout.format.require_pcm()?;
    let channels = layout.format.channels;
    let bits = layout.format.bits_per_sample;
    let format = BufferFormat::from_layout(channels, bits).ok_or(AudioError::UnsupportedLayout { channels, bits })?;
    Ok((file, layout, format))
}

impl Stream {
    fn io_error(&self, source: io::Error) -> AudioError {
        AudioError::FileIo {
            path: self.path.clone(),
            source,
        }
    }

    /// Another pass may start once this one runs out
    fn may_loop(&self) -> bool {
        self.voice.loop_count == 0 || self.loops_remaining > 1
    }

    /// Move the read cursor to `offset` bytes into the PCM data
    fn seek_to(&mut self, offset: u64) -> Result<(), AudioError> {
        let target = self.layout.data_offset + offset;
        self.file
            .seek(SeekFrom::Start(target))
            .map_err(|e| self.io_error(e))?;
        self.cursor = offset;
        Ok(())
    }

    fn rewind_pass(&mut self, logger: &AudioLogger) -> Result<(), AudioError> {
        self.seek_to(0)?;
        if self.voice.loop_count == 0 {
            logger.log_stream_looped(self.index, None);
        } else {
            self.loops_remaining = self.loops_remaining.saturating_sub(1);
            logger.log_stream_looped(self.index, Some(self.loops_remaining));
        }
        Ok(())
    }

    /// Load the next chunk of the pass into `buffer` and queue it.
    ///
    /// Returns `false` when the pass is over and no further pass is
    /// allowed; the buffer is then left unqueued.
    fn fill(&mut self, backend: &mut dyn AudioBackend, logger: &AudioLogger, buffer: BufferId) -> Result<bool, AudioError> {
        if self.cursor >= self.layout.data_len {
            if self.layout.data_len == 0 || !self.may_loop() {
                return Ok(false);
            }
            self.rewind_pass(logger)?;
        }

        let want = (self.layout.data_len - self.cursor).min(self.scratch.len() as u64) as usize;
        let got = match read_full(&mut self.file, &mut self.scratch[..want]) {
            Ok(got) => got,
            Err(e) => return Err(self.io_error(e)),
        };
        if got < want {
            // File is shorter than its data chunk claims
            self.layout.data_len = self.cursor + got as u64;
        }

        let usable = got - got % self.format.bytes_per_frame();
        if usable == 0 {
            self.cursor = self.layout.data_len;
            return Ok(false);
        }

        backend.upload(buffer, self.format, &self.scratch[..usable], self.layout.format.sample_rate)?;
        backend.queue_buffers(self.voice.source, &[buffer])?;
        self.queued_starts.push_back(self.cursor);
        self.cursor += got as u64;
        Ok(true)
    }

    /// Fill idle buffers in order until one comes back empty
    fn prime(&mut self, backend: &mut dyn AudioBackend, logger: &AudioLogger) -> Result<(), AudioError> {
        while let Some(buffer) = self.idle.pop_front() {
            match self.fill(backend, logger, buffer) {
                Ok(true) => {}
                Ok(false) => {
                    self.idle.push_front(buffer);
                    return Ok(());
                }
                Err(e) => {
                    self.idle.push_front(buffer);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Stop the source and take every buffer off its queue
    fn reset_queue(&mut self, backend: &mut dyn AudioBackend) {
        backend.stop(self.voice.source);
        backend.attach_buffer(self.voice.source, None);
        self.idle = self.ring.iter().copied().collect();
        self.queued_starts.clear();
    }

    fn start(&mut self, backend: &mut dyn AudioBackend, logger: &AudioLogger) -> Result<(), AudioError> {
        let mut result = Ok(());
        if !self.primed_fresh {
            self.reset_queue(backend);
            result = self.seek_to(0);
        }
        self.primed_fresh = false;
        self.loops_remaining = self.voice.loop_count;
        if result.is_ok() {
            result = self.prime(backend, logger);
        }

        self.voice.apply(backend, false);
        backend.set_source(self.voice.source, SourceParam::Position(pan_to_position(self.pan)));
        backend.play(self.voice.source);
        self.state = StreamState::Playing;
        logger.log_playback_started(SlotKind::Stream.name(), self.index, &self.layout.format.describe());
        result
    }

    /// Pause playback. A source that already ran dry has its played
    /// buffers recycled now so `resume` continues from the next chunk.
    fn stop(&mut self, backend: &mut dyn AudioBackend, logger: &AudioLogger) -> Result<(), AudioError> {
        if self.state != StreamState::Playing {
            return Ok(());
        }
        if backend.source_state(self.voice.source) == SourceState::Playing {
            backend.pause(self.voice.source);
            self.state = StreamState::Paused;
            return Ok(());
        }

        let refilled = self.recycle(backend, logger);
        self.state = if backend.buffers_queued(self.voice.source) > 0 {
            StreamState::Paused
        } else {
            logger.log_stream_finished(self.index);
            StreamState::Done
        };
        refilled
    }

    fn resume(&mut self, backend: &mut dyn AudioBackend, logger: &AudioLogger) -> Result<(), AudioError> {
        if self.state != StreamState::Paused {
            return Ok(());
        }
        let source = self.voice.source;
        if backend.source_state(source) == SourceState::Paused {
            backend.play(source);
            self.state = StreamState::Playing;
            return Ok(());
        }

        // Stopped under us: play() restarts the queue head, so drop what was heard first
        let refilled = self.recycle(backend, logger);
        if backend.buffers_queued(source) > 0 {
            backend.play(source);
            self.state = StreamState::Playing;
        } else {
            self.state = StreamState::Done;
            logger.log_stream_finished(self.index);
        }
        refilled
    }

    /// Move processed buffers to the idle list and refill them
    fn recycle(&mut self, backend: &mut dyn AudioBackend, logger: &AudioLogger) -> Result<(), AudioError> {
        let source = self.voice.source;
        let processed = backend.buffers_processed(source);
        if processed > 0 {
            for buffer in backend.unqueue_buffers(source, processed) {
                self.queued_starts.pop_front();
                self.idle.push_back(buffer);
            }
        }
        self.prime(backend, logger)
    }

    fn end(&mut self, backend: &mut dyn AudioBackend) {
        backend.stop(self.voice.source);
        backend.rewind(self.voice.source);
        self.state = StreamState::Stopped;
        self.primed_fresh = false;
    }

    fn status(&self, mode: StatusReporting) -> PlaybackStatus {
        match self.state {
            StreamState::Stopped => PlaybackStatus::Stopped,
            StreamState::Playing => PlaybackStatus::Playing,
            StreamState::Paused => report_status(SourceState::Paused, mode),
            StreamState::Done => PlaybackStatus::Done,
        }
    }

    /// Requeue played buffers, recover from an underrun, detect the end
    fn service(&mut self, backend: &mut dyn AudioBackend, logger: &AudioLogger) -> Result<(), AudioError> {
        if self.state != StreamState::Playing {
            return Ok(());
        }
        let source = self.voice.source;
        let refilled = self.recycle(backend, logger);

        let queued = backend.buffers_queued(source);
        if backend.source_state(source) != SourceState::Playing {
            if queued > 0 {
                logger.log_stream_underrun(self.index, queued);
                backend.play(source);
            } else {
                self.state = StreamState::Done;
                logger.log_stream_finished(self.index);
            }
        }
        refilled
    }

    fn ms_position(&self, backend: &dyn AudioBackend) -> MsPosition {
        let byte_rate = self.layout.format.frame_byte_rate();
        let data_len = self.layout.data_len;
        if byte_rate == 0 {
            return MsPosition::default();
        }
        let bytes = match self.state {
            StreamState::Done => data_len,
            StreamState::Stopped => self.queued_starts.front().copied().unwrap_or(0),
            StreamState::Playing | StreamState::Paused => {
                let source = self.voice.source;
                if matches!(backend.source_state(source), SourceState::Playing | SourceState::Paused) {
                    match self.queued_starts.front() {
                        Some(start) if data_len > 0 => (start + backend.byte_offset(source)) % data_len,
                        _ => self.cursor,
                    }
                } else {
                    // Ran dry: the next unplayed buffer, or the read cursor
                    self.queued_starts
                        .get(backend.buffers_processed(source))
                        .copied()
                        .unwrap_or(self.cursor)
                        .min(data_len)
                }
            }
        };
        let total_ms = (data_len * 1000 / byte_rate) as u32;
        let current_ms = ((bytes * 1000 / byte_rate) as u32).min(total_ms);
        MsPosition { total_ms, current_ms }
    }

    /// Restart the queue from `ms` into the data, keeping the play state
    fn seek(&mut self, backend: &mut dyn AudioBackend, logger: &AudioLogger, ms: u32) -> Result<(), AudioError> {
        let frame = self.format.bytes_per_frame() as u64;
        // Round up to a whole frame so the position reads back as `ms`
        let frames = (ms as u64 * self.layout.format.sample_rate as u64).div_ceil(1000);
        let offset = (frames * frame).min(self.layout.data_len);

        self.reset_queue(backend);
        self.seek_to(offset)?;
        let primed = self.prime(backend, logger);
        match self.state {
            StreamState::Playing => backend.play(self.voice.source),
            StreamState::Paused => {}
            StreamState::Stopped | StreamState::Done => {
                self.state = StreamState::Stopped;
                self.primed_fresh = true;
            }
        }
        primed
    }

    pub(crate) fn teardown(&mut self, backend: &mut dyn AudioBackend) {
        self.reset_queue(backend);
        for buffer in self.ring.drain(..) {
            backend.destroy_buffer(buffer);
        }
        self.idle.clear();
        backend.destroy_source(self.voice.source);
    }
}

impl AudioSystem {
    /// Open a WAV file through the current file system and prime the ring.
    pub fn open_stream(&self, path: &str) -> Result<StreamHandle, AudioError> {
        let timer = OperationTimer::new(format!("open stream '{}'", path));
        let result = self.open_stream_inner(path);
        match &result {
            Ok(handle) => {
                self.logger.update_stream_open_metrics(timer.finish());
                self.logger.log_slot_allocated(SlotKind::Stream.name(), handle.index());
            }
            Err(e) => {
                if !matches!(e, AudioError::PoolExhausted { .. }) {
                    self.logger.log_load_failed(path, &e.to_string());
                }
                self.lock().record_error(e);
            }
        }
        result
    }

    fn open_stream_inner(&self, path: &str) -> Result<StreamHandle, AudioError> {
        let file_system = {
            let state = self.lock();
            state.ensure_running()?;
            if state.streams.first_free().is_none() {
                return Err(self.streams_exhausted(state.streams.capacity()));
            }
            std::sync::Arc::clone(&state.file_system)
        };

        let (file, layout, format) = crate::time_operation!("parse stream header", {
            open_stream_file(file_system.as_ref(), path)
        })?;

        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(index) = state.streams.first_free() else {
            return Err(self.streams_exhausted(state.streams.capacity()));
        };

        let backend = state.backend.as_mut();
        let source = backend.create_source()?;
        let mut ring = Vec::with_capacity(state.stream_buffer_count);
        for _ in 0..state.stream_buffer_count {
            match backend.create_buffer() {
                Ok(buffer) => ring.push(buffer),
                Err(e) => {
                    ring.into_iter().for_each(|buffer| backend.destroy_buffer(buffer));
                    backend.destroy_source(source);
                    return Err(e.into());
                }
            }
        }
        backend.set_source(source, SourceParam::Relative(true));
        backend.set_source(source, SourceParam::RolloffFactor(0.0));
        backend.set_source(source, SourceParam::Position(pan_to_position(PAN_CENTER)));

        let mut voice = Voice::new(source);
        voice.base_rate = layout.format.sample_rate;
        voice.playback_rate = layout.format.sample_rate;

        let mut stream = Stream {
            index,
            voice,
            pan: PAN_CENTER,
            idle: ring.iter().copied().collect(),
            ring,
            queued_starts: VecDeque::new(),
            file,
            path: path.to_string(),
            layout,
            format,
            cursor: 0,
            loops_remaining: 1,
            state: StreamState::Stopped,
            primed_fresh: false,
            scratch: vec![0; state.stream_buffer_size],
        };

        if let Err(e) = stream.seek_to(0).and_then(|()| stream.prime(backend, &self.logger)) {
            stream.teardown(backend);
            return Err(e);
        }
        stream.primed_fresh = true;

        match state.streams.occupy(index, stream) {
            Some(handle) => Ok(StreamHandle(handle)),
            None => Err(self.streams_exhausted(state.streams.capacity())),
        }
    }

    fn streams_exhausted(&self, capacity: usize) -> AudioError {
        self.logger.log_pool_exhausted(SlotKind::Stream.name(), capacity);
        AudioError::PoolExhausted {
            kind: SlotKind::Stream,
            capacity,
        }
    }

    /// Stop the stream, free its buffers and source, and close the file.
    pub fn close_stream(&self, handle: StreamHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(mut stream) = state.streams.remove(handle.0) {
            stream.teardown(state.backend.as_mut());
            self.logger.log_slot_released(SlotKind::Stream.name(), handle.index());
        }
    }

    /// Same as [`close_stream`](Self::close_stream)
    pub fn release_stream(&self, handle: StreamHandle) {
        self.close_stream(handle);
    }

    /// Play from the start of the data (or from a position set while
    /// stopped), resetting the loop count.
    pub fn start_stream(&self, handle: StreamHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(stream) = state.streams.get_mut(handle.0) {
            if let Err(e) = stream.start(state.backend.as_mut(), &self.logger) {
                warn!("Stream {} started with a partial queue: {}", handle.index(), e);
                state.record_error(&e);
            }
        }
    }

    pub fn stop_stream(&self, handle: StreamHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(stream) = state.streams.get_mut(handle.0) {
            if let Err(e) = stream.stop(state.backend.as_mut(), &self.logger) {
                warn!("Stream {} pause refill failed: {}", handle.index(), e);
                state.record_error(&e);
            }
        }
    }

    pub fn resume_stream(&self, handle: StreamHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(stream) = state.streams.get_mut(handle.0) {
            if let Err(e) = stream.resume(state.backend.as_mut(), &self.logger) {
                warn!("Stream {} resume refill failed: {}", handle.index(), e);
                state.record_error(&e);
            }
        }
    }

    /// `true` pauses like `stop_stream`, `false` resumes
    pub fn pause_stream(&self, handle: StreamHandle, pause: bool) {
        if pause {
            self.stop_stream(handle);
        } else {
            self.resume_stream(handle);
        }
    }

    pub fn end_stream(&self, handle: StreamHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(stream) = state.streams.get_mut(handle.0) {
            stream.end(state.backend.as_mut());
        }
    }

    pub fn stream_status(&self, handle: StreamHandle) -> PlaybackStatus {
        let state = self.lock();
        state
            .streams
            .get(handle.0)
            .map_or(PlaybackStatus::Free, |stream| stream.status(state.status_reporting))
    }

    /// Refill one stream's queue. Call at least once per buffer length.
    pub fn service_stream(&self, handle: StreamHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(stream) = state.streams.get_mut(handle.0) else {
            return;
        };
        let started = Instant::now();
        let result = stream.service(state.backend.as_mut(), &self.logger);
        self.logger.update_refill_metrics(started.elapsed());
        if let Err(e) = result {
            warn!("Stream {} refill failed: {}", handle.index(), e);
            state.record_error(&e);
        }
    }

    /// Service every open stream
    pub fn service_all_streams(&self) {
        let handles = self.lock().streams.handles();
        for raw in handles {
            self.service_stream(StreamHandle(raw));
        }
    }

    pub fn set_stream_volume(&self, handle: StreamHandle, volume: i32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(stream) = state.streams.get_mut(handle.0) {
            stream.voice.set_volume(state.backend.as_mut(), volume);
        }
    }

    pub fn stream_volume(&self, handle: StreamHandle) -> i32 {
        self.lock()
            .streams
            .get(handle.0)
            .map_or(VOLUME_MAX, |stream| stream.voice.volume)
    }

    pub fn set_stream_pan(&self, handle: StreamHandle, pan: i32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(stream) = state.streams.get_mut(handle.0) {
            stream.pan = clamp_pan(pan);
            state
                .backend
                .set_source(stream.voice.source, SourceParam::Position(pan_to_position(stream.pan)));
        }
    }

    pub fn stream_pan(&self, handle: StreamHandle) -> i32 {
        self.lock()
            .streams
            .get(handle.0)
            .map_or(PAN_CENTER, |stream| stream.pan)
    }

    /// Number of passes through the file; zero loops forever.
    /// Takes effect at once on a playing stream.
    pub fn set_stream_loop_count(&self, handle: StreamHandle, count: u32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(stream) = state.streams.get_mut(handle.0) {
            stream.voice.set_loop_count(state.backend.as_mut(), count, false);
            stream.loops_remaining = count;
        }
    }

    pub fn stream_loop_count(&self, handle: StreamHandle) -> u32 {
        self.lock()
            .streams
            .get(handle.0)
            .map_or(1, |stream| stream.voice.loop_count)
    }

    pub fn set_stream_playback_rate(&self, handle: StreamHandle, rate: u32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(stream) = state.streams.get_mut(handle.0) {
            stream.voice.set_playback_rate(state.backend.as_mut(), rate);
        }
    }

    pub fn stream_playback_rate(&self, handle: StreamHandle) -> u32 {
        self.lock()
            .streams
            .get(handle.0)
            .map_or(0, |stream| stream.voice.playback_rate)
    }

    pub fn set_stream_ms_position(&self, handle: StreamHandle, ms: u32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(stream) = state.streams.get_mut(handle.0) {
            if let Err(e) = stream.seek(state.backend.as_mut(), &self.logger, ms) {
                warn!("Stream {} seek failed: {}", handle.index(), e);
                state.record_error(&e);
            }
        }
    }

    pub fn stream_ms_position(&self, handle: StreamHandle) -> MsPosition {
        let state = self.lock();
        state
            .streams
            .get(handle.0)
            .map_or_else(MsPosition::default, |stream| stream.ms_position(state.backend.as_ref()))
    }

    pub fn set_stream_user_data(&self, handle: StreamHandle, index: usize, value: i32) {
        if let Some(stream) = self.lock().streams.get_mut(handle.0) {
            stream.voice.set_user_data(index, value);
        }
    }

    pub fn stream_user_data(&self, handle: StreamHandle, index: usize) -> i32 {
        self.lock()
            .streams
            .get(handle.0)
            .map_or(0, |stream| stream.voice.user_data(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::{MixerHandle, SoftwareBackend};
    use crate::audio::wav::encode_pcm_wav;
    use crate::config::EngineConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn wav_file(frames: usize, rate: u32) -> NamedTempFile {
        let pcm: Vec<u8> = (0..frames).flat_map(|i| ((i as i16 % 64) * 256).to_le_bytes()).collect();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&encode_pcm_wav(1, rate, 16, &pcm)).unwrap();
        file.flush().unwrap();
        file
    }

    fn path_of(file: &NamedTempFile) -> String {
        file.path().to_string_lossy().to_string()
    }

    fn system() -> (AudioSystem, MixerHandle) {
        let backend = SoftwareBackend::new(22050);
        let mixer = backend.mixer();
        let config = EngineConfig {
            stream_buffer_count: 2,
            stream_buffer_size: 1024,
            ..EngineConfig::default()
        };
        (AudioSystem::with_backend(&config, Box::new(backend)), mixer)
    }

    fn render(mixer: &MixerHandle, frames: usize) {
        let mut out = vec![0.0f32; frames * 2];
        mixer.render(&mut out);
    }

    #[test]
    fn test_read_full_handles_short_reads() {
        let mut reader: &[u8] = b"abc";
        let mut buf = [0u8; 5];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_open_reports_length_and_defaults() {
        let file = wav_file(22050, 22050);
        let (system, _mixer) = system();
        let handle = system.open_stream(&path_of(&file)).unwrap();

        assert_eq!(system.stream_status(handle), PlaybackStatus::Stopped);
        assert_eq!(system.stream_volume(handle), 127);
        assert_eq!(system.stream_pan(handle), 64);
        assert_eq!(system.stream_loop_count(handle), 1);
        assert_eq!(system.stream_playback_rate(handle), 22050);
        assert_eq!(
            system.stream_ms_position(handle),
            MsPosition {
                total_ms: 1000,
                current_ms: 0
            }
        );
    }

    #[test]
    fn test_open_missing_file_fails() {
        let (system, _mixer) = system();
        match system.open_stream("/no/such/dir/track.wav") {
            Err(AudioError::FileIo { path, .. }) => assert!(path.contains("track.wav")),
            _ => panic!("opening a missing file should fail"),
        }
        assert!(system.last_error().is_some());
    }

    #[test]
    fn test_open_rejects_garbage() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"this is not a wav file at all").unwrap();
        let (system, _mixer) = system();
        assert!(matches!(
            system.open_stream(&path_of(&file)),
            Err(AudioError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_plays_to_done() {
        let file = wav_file(1000, 22050);
        let (system, mixer) = system();
        let handle = system.open_stream(&path_of(&file)).unwrap();

        system.start_stream(handle);
        assert_eq!(system.stream_status(handle), PlaybackStatus::Playing);

        for _ in 0..8 {
            render(&mixer, 256);
            system.service_stream(handle);
        }
        assert_eq!(system.stream_status(handle), PlaybackStatus::Done);
        assert_eq!(system.stream_ms_position(handle).current_ms, 45);
    }

    #[test]
    fn test_pause_and_resume() {
        let file = wav_file(4000, 22050);
        let (system, mixer) = system();
        let handle = system.open_stream(&path_of(&file)).unwrap();
        system.start_stream(handle);
        render(&mixer, 256);

        system.pause_stream(handle, true);
        assert_eq!(system.stream_status(handle), PlaybackStatus::Stopped);
        let paused_at = system.stream_ms_position(handle);
        render(&mixer, 256);
        system.service_stream(handle);
        assert_eq!(system.stream_ms_position(handle), paused_at);

        system.pause_stream(handle, false);
        assert_eq!(system.stream_status(handle), PlaybackStatus::Playing);
    }

    #[test]
    fn test_seek_while_stopped_is_kept_by_start() {
        let file = wav_file(22050, 22050);
        let (system, _mixer) = system();
        let handle = system.open_stream(&path_of(&file)).unwrap();

        system.set_stream_ms_position(handle, 500);
        assert_eq!(system.stream_ms_position(handle).current_ms, 500);

        system.start_stream(handle);
        assert_eq!(system.stream_ms_position(handle).current_ms, 500);
    }

    #[test]
    fn test_seek_while_playing() {
        let file = wav_file(22050, 22050);
        let (system, mixer) = system();
        let handle = system.open_stream(&path_of(&file)).unwrap();
        system.start_stream(handle);
        render(&mixer, 128);

        system.set_stream_ms_position(handle, 750);
        assert_eq!(system.stream_status(handle), PlaybackStatus::Playing);
        assert_eq!(system.stream_ms_position(handle).current_ms, 750);
    }

    #[test]
    fn test_seek_reads_back_requested_ms() {
        let file = wav_file(22050, 22050);
        let (system, mixer) = system();
        let handle = system.open_stream(&path_of(&file)).unwrap();

        system.set_stream_ms_position(handle, 250);
        assert_eq!(system.stream_ms_position(handle).current_ms, 250);

        system.start_stream(handle);
        render(&mixer, 64);
        for ms in [1, 250, 333, 999] {
            system.set_stream_ms_position(handle, ms);
            assert_eq!(system.stream_ms_position(handle).current_ms, ms);
        }
    }

    #[test]
    fn test_resume_after_running_dry_continues_forward() {
        // Each sample holds its own frame index
        let pcm: Vec<u8> = (0..4000).flat_map(|i| (i as i16).to_le_bytes()).collect();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&encode_pcm_wav(1, 22050, 16, &pcm)).unwrap();
        file.flush().unwrap();

        let (system, mixer) = system();
        let handle = system.open_stream(&path_of(&file)).unwrap();
        system.start_stream(handle);

        // Two 512-frame buffers queued, nothing refills them
        render(&mixer, 2000);
        assert_eq!(system.stream_ms_position(handle).current_ms, 2048 * 1000 / 44100);

        system.stop_stream(handle);
        assert_ne!(system.stream_status(handle), PlaybackStatus::Done);
        assert_eq!(system.stream_ms_position(handle).current_ms, 2048 * 1000 / 44100);

        system.resume_stream(handle);
        assert_eq!(system.stream_status(handle), PlaybackStatus::Playing);

        let mut out = vec![0.0f32; 8];
        mixer.render(&mut out);
        // Frame 1024 comes next; frame 0 would be silent
        assert!(out[0] > 0.01, "left was {}", out[0]);
        assert!(system.stream_ms_position(handle).current_ms >= 46);
    }

    #[test]
    fn test_stop_after_last_chunk_played_is_done() {
        let file = wav_file(1000, 22050);
        let (system, mixer) = system();
        let handle = system.open_stream(&path_of(&file)).unwrap();
        system.start_stream(handle);
        render(&mixer, 2000);

        system.stop_stream(handle);
        assert_eq!(system.stream_status(handle), PlaybackStatus::Done);

        system.resume_stream(handle);
        assert_eq!(system.stream_status(handle), PlaybackStatus::Done);
        let position = system.stream_ms_position(handle);
        assert_eq!(position.current_ms, position.total_ms);
    }

    #[test]
    fn test_loop_ending_on_buffer_boundary_plays_every_pass() {
        // 1024 frames fill both ring buffers exactly
        let pcm: Vec<u8> = (0..1024).flat_map(|_| 8000i16.to_le_bytes()).collect();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&encode_pcm_wav(1, 22050, 16, &pcm)).unwrap();
        file.flush().unwrap();

        let (system, mixer) = system();
        let handle = system.open_stream(&path_of(&file)).unwrap();
        system.set_stream_loop_count(handle, 3);
        system.start_stream(handle);

        let mut audible = 0;
        let mut out = vec![0.0f32; 256 * 2];
        for _ in 0..20 {
            out.iter_mut().for_each(|s| *s = 0.0);
            mixer.render(&mut out);
            audible += out.chunks(2).filter(|f| f[0] != 0.0 || f[1] != 0.0).count();
            system.service_stream(handle);
        }

        assert_eq!(audible, 3 * 1024);
        assert_eq!(system.stream_status(handle), PlaybackStatus::Done);
    }

    #[test]
    fn test_end_then_restart() {
        let file = wav_file(1000, 22050);
        let (system, mixer) = system();
        let handle = system.open_stream(&path_of(&file)).unwrap();
        system.start_stream(handle);
        render(&mixer, 300);

        system.end_stream(handle);
        assert_eq!(system.stream_status(handle), PlaybackStatus::Stopped);

        system.start_stream(handle);
        assert_eq!(system.stream_status(handle), PlaybackStatus::Playing);
        assert_eq!(system.stream_ms_position(handle).current_ms, 0);
    }

    #[test]
    fn test_close_frees_slot() {
        let file = wav_file(1000, 22050);
        let (system, _mixer) = system();
        let handle = system.open_stream(&path_of(&file)).unwrap();
        system.set_stream_user_data(handle, 0, 11);
        assert_eq!(system.stream_user_data(handle, 0), 11);

        system.close_stream(handle);
        system.release_stream(handle);
        assert_eq!(system.stream_status(handle), PlaybackStatus::Free);
        assert_eq!(system.stream_user_data(handle, 0), 0);
        system.service_stream(handle);
    }
}
