pub mod backend;
pub mod device;
pub mod file_io;
pub mod listener;
pub mod pool;
pub mod sample;
pub mod sample3d;
pub mod state;
pub mod stream;
pub mod system;
pub mod timer;
pub mod wav;

// Re-export the context and its handles
pub use system::AudioSystem;
pub use listener::Listener;
pub use pool::{Sample3dHandle, SampleHandle, StreamHandle, TimerHandle};

// Re-export backend types
pub use backend::{AudioBackend, BufferFormat, MixerHandle, NullBackend, SoftwareBackend, SourceState};
pub use state::report_status;

// Re-export device management types
pub use device::{DeviceInfo, DeviceManager, OutputDevice};

// Re-export file access
pub use file_io::{AudioFile, CallbackFileSystem, FileSystem, FileToken, StdFileSystem};

pub use timer::{TimerCallback, TimerManager, DEFAULT_TIMER_PERIOD_US};
pub use wav::{encode_pcm_wav, parse_wav, read_wav_layout, SoundInfo, WavFormat, WavLayout};
