use crate::models::SlotKind;
use thiserror::Error;

/// Main engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("WAV error: {0}")]
    Wav(#[from] WavError),

    #[error("Timer error: {0}")]
    Timer(#[from] TimerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),
}

impl EngineError {
    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Audio(err) => err.user_message(),
            EngineError::Backend(err) => err.user_message(),
            EngineError::Wav(err) => err.user_message(),
            EngineError::Timer(err) => err.user_message(),
            EngineError::Config(err) => err.user_message(),
            EngineError::File(err) => Self::format_file_error(err),
        }
    }

    /// Get suggested recovery actions for the error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            EngineError::Audio(err) => err.recovery_suggestions(),
            EngineError::Backend(err) => err.recovery_suggestions(),
            EngineError::Wav(err) => err.recovery_suggestions(),
            EngineError::Timer(err) => err.recovery_suggestions(),
            EngineError::Config(err) => err.recovery_suggestions(),
            EngineError::File(_) => vec![
                "Check that the file path is correct".to_string(),
                "Check file permissions".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::Audio(err) => err.is_recoverable(),
            EngineError::Backend(err) => err.is_recoverable(),
            EngineError::Wav(err) => err.is_recoverable(),
            EngineError::Timer(err) => err.is_recoverable(),
            EngineError::Config(err) => err.is_recoverable(),
            EngineError::File(_) => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EngineError::Audio(AudioError::PoolExhausted { .. }) => ErrorSeverity::Warning,
            EngineError::Audio(AudioError::InitializationFailed(_)) => ErrorSeverity::Critical,
            EngineError::Audio(_) => ErrorSeverity::Error,
            EngineError::Backend(BackendError::DeviceUnavailable(_)) => ErrorSeverity::Warning,
            EngineError::Backend(_) => ErrorSeverity::Error,
            EngineError::Wav(_) => ErrorSeverity::Error,
            EngineError::Timer(TimerError::PoolExhausted { .. }) => ErrorSeverity::Warning,
            EngineError::Timer(_) => ErrorSeverity::Error,
            EngineError::Config(_) => ErrorSeverity::Warning,
            EngineError::File(_) => ErrorSeverity::Error,
        }
    }

    fn format_file_error(err: &std::io::Error) -> String {
        match err.kind() {
            std::io::ErrorKind::NotFound => "File or directory not found".to_string(),
            std::io::ErrorKind::PermissionDenied => "Permission denied - cannot access file".to_string(),
            std::io::ErrorKind::UnexpectedEof => "File appears to be truncated".to_string(),
            _ => format!("File system error: {}", err),
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Failures while walking a RIFF/WAVE image
#[derive(Debug, Error)]
pub enum WavError {
    #[error("Missing RIFF magic")]
    NotRiff,

    #[error("Missing WAVE form type")]
    NotWave,

    #[error("Truncated {what}")]
    Truncated { what: &'static str },

    #[error("Missing '{chunk}' chunk")]
    MissingChunk { chunk: &'static str },

    #[error("Channel count is zero")]
    ZeroChannels,

    #[error("Bits per sample is zero")]
    ZeroBitsPerSample,

    #[error("Unsupported format tag: {tag}")]
    UnsupportedFormatTag { tag: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WavError {
    pub fn user_message(&self) -> String {
        match self {
            WavError::NotRiff | WavError::NotWave => "File is not a RIFF/WAVE file".to_string(),
            WavError::Truncated { what } => format!("WAV file is truncated ({})", what),
            WavError::MissingChunk { chunk } => {
                format!("WAV file has no '{}' chunk", chunk)
            }
            WavError::ZeroChannels | WavError::ZeroBitsPerSample => {
                "WAV format header describes an empty sample layout".to_string()
            }
            WavError::UnsupportedFormatTag { tag } => {
                format!("WAV encoding {} is not supported, only integer PCM (1) is", tag)
            }
            WavError::Io(err) => format!("Cannot read WAV data: {}", err),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            WavError::UnsupportedFormatTag { .. } => vec![
                "Re-export the sound as uncompressed 8 or 16-bit PCM".to_string(),
                "ADPCM and floating point WAV files are not supported".to_string(),
            ],
            WavError::Io(_) => vec!["Check that the file is readable".to_string()],
            _ => vec![
                "Try re-exporting or re-copying the file".to_string(),
                "Verify the file is a standard RIFF/WAVE file".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        false
    }
}

/// Failures reported by a hardware backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Source creation failed: {0}")]
    SourceCreationFailed(String),

    #[error("Buffer creation failed: {0}")]
    BufferCreationFailed(String),

    #[error("Unknown source: {id}")]
    UnknownSource { id: u32 },

    #[error("Unknown buffer: {id}")]
    UnknownBuffer { id: u32 },

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Output stream error: {0}")]
    StreamBuildFailed(String),
}

impl BackendError {
    pub fn user_message(&self) -> String {
        match self {
            BackendError::SourceCreationFailed(msg) | BackendError::BufferCreationFailed(msg) => {
                format!("The audio backend ran out of voices or memory: {}", msg)
            }
            BackendError::UnknownSource { id } => format!("Audio source {} does not exist", id),
            BackendError::UnknownBuffer { id } => format!("Audio buffer {} does not exist", id),
            BackendError::InvalidUpload(msg) => format!("Cannot upload PCM data: {}", msg),
            BackendError::DeviceUnavailable(msg) => {
                format!("No usable audio output device: {}", msg)
            }
            BackendError::StreamBuildFailed(msg) => {
                format!("Failed to open the audio output stream: {}", msg)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            BackendError::DeviceUnavailable(_) | BackendError::StreamBuildFailed(_) => vec![
                "Use 'gaplay devices' to list output devices".to_string(),
                "Check that no other application holds the device exclusively".to_string(),
                "Playback continues silently until a device is available".to_string(),
            ],
            BackendError::SourceCreationFailed(_) | BackendError::BufferCreationFailed(_) => vec![
                "Release sounds that are no longer playing".to_string(),
            ],
            _ => vec!["Reload the sound".to_string()],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, BackendError::InvalidUpload(_))
    }
}

/// Errors surfaced by sample and stream load operations
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("No free {} slot (capacity {capacity})", kind.name())]
    PoolExhausted { kind: SlotKind, capacity: usize },

    #[error("Malformed input: {0}")]
    MalformedInput(#[from] WavError),

    #[error("Unsupported PCM layout: {channels} channel(s), {bits} bit(s)")]
    UnsupportedLayout { channels: u16, bits: u16 },

    #[error("Hardware failure: {0}")]
    Backend(#[from] BackendError),

    #[error("Cannot open '{path}': {source}")]
    FileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Audio initialization failed: {0}")]
    InitializationFailed(String),
}

impl AudioError {
    pub fn user_message(&self) -> String {
        match self {
            AudioError::PoolExhausted { kind, capacity } => {
                format!("All {} {} slots are in use", capacity, kind.name())
            }
            AudioError::MalformedInput(err) => err.user_message(),
            AudioError::UnsupportedLayout { channels, bits } => format!(
                "Sound layout with {} channel(s) at {} bits is not supported here",
                channels, bits
            ),
            AudioError::Backend(err) => err.user_message(),
            AudioError::FileIo { path, source } => format!("Cannot open '{}': {}", path, source),
            AudioError::InitializationFailed(msg) => {
                format!("Failed to initialize audio system: {}", msg)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            AudioError::PoolExhausted { .. } => vec![
                "Release the lowest priority playing sound and retry".to_string(),
                "Increase the pool capacity in the configuration".to_string(),
            ],
            AudioError::MalformedInput(err) => err.recovery_suggestions(),
            AudioError::UnsupportedLayout { .. } => vec![
                "Use mono or stereo PCM at 8 or 16 bits".to_string(),
                "Positional sounds must be mono".to_string(),
            ],
            AudioError::Backend(err) => err.recovery_suggestions(),
            AudioError::FileIo { .. } => vec![
                "Check that the file path is correct".to_string(),
                "Check file permissions".to_string(),
            ],
            AudioError::InitializationFailed(_) => vec![
                "Restart the application".to_string(),
                "Verify audio drivers are properly installed".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            AudioError::PoolExhausted { .. } => true,
            AudioError::MalformedInput(_) => false,
            AudioError::UnsupportedLayout { .. } => false,
            AudioError::Backend(err) => err.is_recoverable(),
            AudioError::FileIo { .. } => false,
            AudioError::InitializationFailed(_) => true,
        }
    }
}

/// Timer subsystem errors
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("No free timer slot (capacity {capacity})")]
    PoolExhausted { capacity: usize },

    #[error("Failed to spawn timer thread: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

impl TimerError {
    pub fn user_message(&self) -> String {
        match self {
            TimerError::PoolExhausted { capacity } => {
                format!("All {} timers are registered", capacity)
            }
            TimerError::SpawnFailed(err) => format!("Cannot start timer thread: {}", err),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            TimerError::PoolExhausted { .. } => vec!["Release an unused timer".to_string()],
            TimerError::SpawnFailed(_) => vec!["Reduce the number of running timers".to_string()],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        true
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => {
                format!("Cannot access configuration file: {}", err)
            }
            ConfigError::SerializationError(_) => {
                "Failed to save configuration settings".to_string()
            }
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ConfigError::ConfigDirNotFound => vec![
                "Check that you have write permissions to your home directory".to_string(),
                "Try creating the directory manually: ~/.config/game-audio/".to_string(),
            ],
            ConfigError::IoError(_) => vec![
                "Check file permissions for the configuration directory".to_string(),
                "Ensure the disk is not full".to_string(),
            ],
            ConfigError::SerializationError(_) => vec![
                "Try resetting configuration to defaults".to_string(),
            ],
            ConfigError::DeserializationError(_) => vec![
                "Run 'gaplay config reset' to restore defaults".to_string(),
                "Check the configuration file format manually".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_engine_error_from_audio_error() {
        let audio_error = AudioError::PoolExhausted {
            kind: SlotKind::Sample2D,
            capacity: 64,
        };
        let engine_error: EngineError = audio_error.into();

        match engine_error {
            EngineError::Audio(AudioError::PoolExhausted { capacity, .. }) => {
                assert_eq!(capacity, 64);
            }
            _ => panic!("Expected Audio error variant"),
        }
    }

    #[test]
    fn test_audio_error_from_wav_and_backend() {
        let err: AudioError = WavError::NotRiff.into();
        assert!(matches!(err, AudioError::MalformedInput(WavError::NotRiff)));

        let err: AudioError = BackendError::UnknownBuffer { id: 9 }.into();
        assert!(matches!(err, AudioError::Backend(BackendError::UnknownBuffer { id: 9 })));
    }

    #[test]
    fn test_audio_error_display() {
        let error = AudioError::PoolExhausted {
            kind: SlotKind::Stream,
            capacity: 8,
        };
        assert_eq!(format!("{}", error), "No free stream slot (capacity 8)");

        let error = AudioError::UnsupportedLayout { channels: 2, bits: 16 };
        assert_eq!(
            format!("{}", error),
            "Unsupported PCM layout: 2 channel(s), 16 bit(s)"
        );

        let error = AudioError::MalformedInput(WavError::MissingChunk { chunk: "data" });
        assert_eq!(format!("{}", error), "Malformed input: Missing 'data' chunk");
    }

    #[test]
    fn test_wav_error_display() {
        assert_eq!(format!("{}", WavError::NotRiff), "Missing RIFF magic");
        assert_eq!(
            format!("{}", WavError::UnsupportedFormatTag { tag: 2 }),
            "Unsupported format tag: 2"
        );
        assert_eq!(
            format!("{}", WavError::Truncated { what: "chunk header" }),
            "Truncated chunk header"
        );
    }

    #[test]
    fn test_severity_levels() {
        let err: EngineError = AudioError::PoolExhausted {
            kind: SlotKind::Sample3D,
            capacity: 64,
        }
        .into();
        assert_eq!(err.severity(), ErrorSeverity::Warning);
        assert_eq!(err.severity().log_level(), log::Level::Warn);
        assert!(err.is_recoverable());

        let err: EngineError = WavError::NotWave.into();
        assert_eq!(err.severity(), ErrorSeverity::Error);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::ConfigDirNotFound;
        assert_eq!(format!("{}", error), "Configuration directory not found");

        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied");
        let error = ConfigError::IoError(io_error);
        assert!(format!("{}", error).contains("IO error"));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let io_error = io::Error::new(io::ErrorKind::NotFound, "missing");
        let audio_error = AudioError::FileIo {
            path: "music.wav".to_string(),
            source: io_error,
        };
        let engine_error = EngineError::Audio(audio_error);

        let mut current_error: &dyn Error = &engine_error;
        let mut error_count = 0;
        while let Some(source) = current_error.source() {
            current_error = source;
            error_count += 1;
        }
        assert!(error_count >= 2);
    }

    #[test]
    fn test_recovery_suggestions_not_empty() {
        let errors: Vec<EngineError> = vec![
            AudioError::InitializationFailed("x".into()).into(),
            BackendError::DeviceUnavailable("none".into()).into(),
            TimerError::PoolExhausted { capacity: 8 }.into(),
            ConfigError::ConfigDirNotFound.into(),
        ];
        for err in errors {
            assert!(!err.recovery_suggestions().is_empty());
            assert!(!err.user_message().is_empty());
        }
    }
}
