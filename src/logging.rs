use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Timings of the engine's potentially slow operations
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub wav_parse_time: Duration,
    pub stream_open_time: Duration,
    pub stream_refill_time: Duration,
    pub longest_refill_time: Duration,
}

/// Engine event kept in the in-memory history
#[derive(Debug, Clone)]
pub struct AudioEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AudioEventType,
    pub duration: Option<Duration>,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEventType {
    SlotAllocated,
    SlotReleased,
    PoolExhausted,
    LoadFailed,
    PlaybackStarted,
    StreamLooped,
    StreamUnderrun,
    StreamFinished,
    TimerStarted,
    TimerStopped,
    BackendFallback,
    PerformanceWarning,
}

impl AudioEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioEventType::SlotAllocated => "SLOT_ALLOCATED",
            AudioEventType::SlotReleased => "SLOT_RELEASED",
            AudioEventType::PoolExhausted => "POOL_EXHAUSTED",
            AudioEventType::LoadFailed => "LOAD_FAILED",
            AudioEventType::PlaybackStarted => "PLAYBACK_STARTED",
            AudioEventType::StreamLooped => "STREAM_LOOPED",
            AudioEventType::StreamUnderrun => "STREAM_UNDERRUN",
            AudioEventType::StreamFinished => "STREAM_FINISHED",
            AudioEventType::TimerStarted => "TIMER_STARTED",
            AudioEventType::TimerStopped => "TIMER_STOPPED",
            AudioEventType::BackendFallback => "BACKEND_FALLBACK",
            AudioEventType::PerformanceWarning => "PERFORMANCE_WARNING",
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Logger for engine operations and debugging
#[derive(Clone)]
pub struct AudioLogger {
    events: Arc<Mutex<VecDeque<AudioEvent>>>,
    max_events: usize,
    performance_metrics: Arc<Mutex<PerformanceMetrics>>,
}

impl Default for AudioLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioLogger {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            max_events,
            performance_metrics: Arc::new(Mutex::new(PerformanceMetrics::default())),
        }
    }

    /// Install the env_logger sink, level from `GAME_AUDIO_LOG_LEVEL`
    pub fn init() -> Result<(), Box<dyn std::error::Error>> {
        let log_level = std::env::var("GAME_AUDIO_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let mut builder = env_logger::Builder::new();

        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });

        builder.filter_level(parse_level(&log_level));
        builder.try_init()?;

        info!("Game audio logging initialized with level: {}", log_level);
        Ok(())
    }

    /// Record an event and forward it to `log`
    pub fn log_event(&self, event_type: AudioEventType, details: String, duration: Option<Duration>) {
        match event_type {
            AudioEventType::SlotAllocated | AudioEventType::SlotReleased => {
                debug!("[{}] {}", event_type.as_str(), details);
            }
            AudioEventType::PlaybackStarted
            | AudioEventType::StreamLooped
            | AudioEventType::StreamFinished
            | AudioEventType::TimerStarted
            | AudioEventType::TimerStopped => {
                info!("[{}] {}", event_type.as_str(), details);
            }
            AudioEventType::PoolExhausted
            | AudioEventType::StreamUnderrun
            | AudioEventType::BackendFallback => {
                warn!("[{}] {}", event_type.as_str(), details);
            }
            AudioEventType::LoadFailed => {
                error!("[{}] {}", event_type.as_str(), details);
            }
            AudioEventType::PerformanceWarning => {
                warn!("[{}] {} (duration: {:?})", event_type.as_str(), details, duration);
            }
        }

        let mut events = lock(&self.events);
        events.push_back(AudioEvent {
            timestamp: Utc::now(),
            event_type,
            duration,
            details,
        });
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    pub fn log_slot_allocated(&self, kind: &str, index: usize) {
        self.log_event(
            AudioEventType::SlotAllocated,
            format!("Allocated {} slot {}", kind, index),
            None,
        );
    }

    pub fn log_slot_released(&self, kind: &str, index: usize) {
        self.log_event(
            AudioEventType::SlotReleased,
            format!("Released {} slot {}", kind, index),
            None,
        );
    }

    pub fn log_pool_exhausted(&self, kind: &str, capacity: usize) {
        self.log_event(
            AudioEventType::PoolExhausted,
            format!("No free {} slot out of {}", kind, capacity),
            None,
        );
    }

    pub fn log_load_failed(&self, what: &str, error: &str) {
        self.log_event(
            AudioEventType::LoadFailed,
            format!("Load of {} failed: {}", what, error),
            None,
        );
    }

    pub fn log_playback_started(&self, kind: &str, index: usize, format_info: &str) {
        self.log_event(
            AudioEventType::PlaybackStarted,
            format!("Started {} {} ({})", kind, index, format_info),
            None,
        );
    }

    pub fn log_stream_looped(&self, index: usize, loops_remaining: Option<u32>) {
        let details = match loops_remaining {
            Some(left) => format!("Stream {} rewound, {} pass(es) left", index, left),
            None => format!("Stream {} rewound, looping forever", index),
        };
        self.log_event(AudioEventType::StreamLooped, details, None);
    }

    pub fn log_stream_underrun(&self, index: usize, queued: usize) {
        self.log_event(
            AudioEventType::StreamUnderrun,
            format!("Stream {} starved with {} buffer(s) queued, restarting", index, queued),
            None,
        );
    }

    pub fn log_stream_finished(&self, index: usize) {
        self.log_event(
            AudioEventType::StreamFinished,
            format!("Stream {} drained", index),
            None,
        );
    }

    pub fn log_timer_started(&self, index: usize, period_us: u64) {
        self.log_event(
            AudioEventType::TimerStarted,
            format!("Timer {} started with period {}us", index, period_us),
            None,
        );
    }

    pub fn log_timer_stopped(&self, index: usize) {
        self.log_event(
            AudioEventType::TimerStopped,
            format!("Timer {} stopped", index),
            None,
        );
    }

    pub fn log_backend_fallback(&self, reason: &str) {
        self.log_event(
            AudioEventType::BackendFallback,
            format!("Falling back to silent backend: {}", reason),
            None,
        );
    }

    pub fn log_performance_warning(&self, operation: &str, duration: Duration, threshold: Duration) {
        self.log_event(
            AudioEventType::PerformanceWarning,
            format!(
                "{} took {}ms (threshold: {}ms)",
                operation,
                duration.as_millis(),
                threshold.as_millis()
            ),
            Some(duration),
        );
    }

    pub fn update_wav_parse_metrics(&self, parse_time: Duration) {
        lock(&self.performance_metrics).wav_parse_time = parse_time;
    }

    pub fn update_stream_open_metrics(&self, open_time: Duration) {
        lock(&self.performance_metrics).stream_open_time = open_time;

        let threshold = Duration::from_millis(200);
        if open_time > threshold {
            self.log_performance_warning("Stream open", open_time, threshold);
        }
    }

    /// Refills run every frame, so they get a tight threshold
    pub fn update_refill_metrics(&self, refill_time: Duration) {
        {
            let mut metrics = lock(&self.performance_metrics);
            metrics.stream_refill_time = refill_time;
            if refill_time > metrics.longest_refill_time {
                metrics.longest_refill_time = refill_time;
            }
        }

        let threshold = Duration::from_millis(20);
        if refill_time > threshold {
            self.log_performance_warning("Stream refill", refill_time, threshold);
        }
    }

    /// Get recent events for debugging
    pub fn get_recent_events(&self, count: usize) -> Vec<AudioEvent> {
        let events = lock(&self.events);
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        lock(&self.performance_metrics).clone()
    }

    pub fn clear_events(&self) {
        lock(&self.events).clear();
    }

    pub fn get_event_statistics(&self) -> EventStatistics {
        let events = lock(&self.events);
        let mut stats = EventStatistics::default();

        for event in events.iter() {
            match event.event_type {
                AudioEventType::StreamUnderrun => stats.stream_underruns += 1,
                AudioEventType::LoadFailed => stats.load_failures += 1,
                AudioEventType::PoolExhausted => stats.pool_exhaustions += 1,
                AudioEventType::StreamLooped => stats.stream_loops += 1,
                _ => {}
            }
        }

        stats.total_events = events.len();
        stats
    }
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

/// Statistics about logged events
#[derive(Debug, Clone, Default)]
pub struct EventStatistics {
    pub total_events: usize,
    pub stream_underruns: usize,
    pub load_failures: usize,
    pub pool_exhaustions: usize,
    pub stream_loops: usize,
}

/// Timer utility for measuring operation durations
pub struct OperationTimer {
    start_time: Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn new(operation_name: String) -> Self {
        trace!("Starting operation: {}", operation_name);
        Self {
            start_time: Instant::now(),
            operation_name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn finish(self) -> Duration {
        let duration = self.elapsed();
        trace!("Completed operation '{}' in {}us", self.operation_name, duration.as_micros());
        duration
    }

    pub fn finish_with_threshold(self, threshold: Duration) -> Duration {
        let duration = self.elapsed();
        if duration > threshold {
            warn!(
                "Operation '{}' took {}ms (threshold: {}ms)",
                self.operation_name,
                duration.as_millis(),
                threshold.as_millis()
            );
        } else {
            trace!("Completed operation '{}' in {}us", self.operation_name, duration.as_micros());
        }
        duration
    }
}

/// Macro for timing operations
#[macro_export]
macro_rules! time_operation {
    ($name:expr, $code:block) => {{
        let timer = $crate::logging::OperationTimer::new($name.to_string());
        let result = $code;
        let _duration = timer.finish();
        result
    }};
}

/// Macro for timing operations with threshold warnings
#[macro_export]
macro_rules! time_operation_with_threshold {
    ($name:expr, $threshold:expr, $code:block) => {{
        let timer = $crate::logging::OperationTimer::new($name.to_string());
        let result = $code;
        let _duration = timer.finish_with_threshold($threshold);
        result
    }};
}
