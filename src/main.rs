use game_audio_core::audio::{parse_wav, AudioSystem, DeviceManager};
use game_audio_core::cli::{CliApp, Commands, ConfigAction};
use game_audio_core::config::{ConfigManager, EngineConfig};
use game_audio_core::error::{ConfigError, EngineError};
use game_audio_core::logging::AudioLogger;
use game_audio_core::models::{MsPosition, PlaybackStatus, StatusReporting, Vec3};
use log::{info, log, warn};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Drives one command against a freshly started audio system
pub struct AppController {
    config_manager: Option<ConfigManager>,
    status_reporting: StatusReporting,
    shutdown_flag: Arc<AtomicBool>,
}

impl AppController {
    pub fn new(distinct_status: bool) -> Self {
        // Initialize logging first (default to 'warn' if unspecified)
        if std::env::var("GAME_AUDIO_LOG_LEVEL").is_err() {
            std::env::set_var("GAME_AUDIO_LOG_LEVEL", "warn");
        }
        if let Err(e) = AudioLogger::init() {
            eprintln!("Warning: Failed to initialize logging: {}", e);
        }

        let config_manager = match ConfigManager::new() {
            Ok(manager) => Some(manager),
            Err(e) => {
                warn!("Could not load configuration, using defaults: {}", e);
                None
            }
        };

        let status_reporting = if distinct_status {
            StatusReporting::Distinct
        } else {
            config_manager
                .as_ref()
                .map_or(StatusReporting::Legacy, |manager| manager.get_config().status_reporting)
        };

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown_flag);
        if let Err(e) = ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        }) {
            warn!("Could not install the Ctrl-C handler: {}", e);
        }

        Self {
            config_manager,
            status_reporting,
            shutdown_flag,
        }
    }

    fn config(&self) -> EngineConfig {
        self.config_manager
            .as_ref()
            .map(|manager| manager.get_config().clone())
            .unwrap_or_default()
    }

    fn start_system(&self) -> AudioSystem {
        let system = AudioSystem::startup(&self.config());
        system.set_status_reporting(self.status_reporting);
        match system.output_device_name() {
            Some(name) => println!("Output: {}", name),
            None => println!("Output: none ({}), playback is silent", system.backend_name()),
        }
        system
    }

    /// Execute a single command
    pub async fn execute_command(&mut self, command: Commands) -> Result<(), EngineError> {
        match command {
            Commands::Info { file } => {
                let bytes = std::fs::read(&file)?;
                let sound = game_audio_core::time_operation_with_threshold!(
                    "parse wav header",
                    Duration::from_millis(50),
                    { parse_wav(&bytes) }
                )?;
                println!("File:     {}", file.display());
                println!("Format:   {}", sound.format.describe());
                println!("Frames:   {}", sound.sample_count().unwrap_or(0));
                println!("Duration: {}", CliApp::format_ms(sound.duration_ms()));
                if let Err(e) = sound.format.require_pcm() {
                    println!("Playable: no ({})", e.user_message());
                }
            }
            Commands::Play {
                file,
                volume,
                pan,
                rate,
                loops,
            } => {
                let bytes = std::fs::read(&file)?;
                let system = self.start_system();
                let handle = system.allocate_sample()?;
                system.set_sample_file(handle, &bytes)?;
                system.set_sample_volume(handle, volume);
                system.set_sample_pan(handle, pan);
                if let Some(rate) = rate {
                    system.set_sample_playback_rate(handle, rate);
                }
                system.set_sample_loop_count(handle, loops);

                system.start_sample(handle);
                self.watch(&label(&file), || {
                    (system.sample_status(handle), system.sample_ms_position(handle))
                })
                .await;
                system.release_sample(handle);
            }
            Commands::Play3d { file, x, y, z, loops } => {
                let bytes = std::fs::read(&file)?;
                let system = self.start_system();
                let handle = system.allocate_3d_sample()?;
                system.set_3d_sample_file(handle, &bytes)?;
                system.set_3d_sample_position(handle, Vec3::new(x, y, z));
                system.set_3d_sample_loop_count(handle, loops);

                system.start_3d_sample(handle);
                self.watch(&label(&file), || {
                    (system.sample_3d_status(handle), system.sample_3d_ms_position(handle))
                })
                .await;
                system.release_3d_sample(handle);
            }
            Commands::Stream {
                file,
                loops,
                start,
                service_us,
            } => {
                let system = Arc::new(self.start_system());
                let handle = system.open_stream(&file.to_string_lossy())?;
                system.set_stream_loop_count(handle, loops);
                if let Some(start) = start {
                    system.set_stream_ms_position(handle, start.as_millis().min(u32::MAX as u128) as u32);
                }

                // The timer holds a weak reference so dropping the system is never blocked on it
                let weak = Arc::downgrade(&system);
                let timer = system.register_timer(move |_| {
                    if let Some(system) = weak.upgrade() {
                        system.service_stream(handle);
                    }
                })?;
                system.set_timer_period(timer, service_us);
                system.start_timer(timer)?;

                system.start_stream(handle);
                self.watch(&label(&file), || {
                    (system.stream_status(handle), system.stream_ms_position(handle))
                })
                .await;

                system.release_timer(timer);
                system.release_stream(handle);
                let stats = system.logger().get_event_statistics();
                info!(
                    "Stream finished: {} loop(s), {} underrun(s)",
                    stats.stream_loops, stats.stream_underruns
                );
            }
            Commands::Devices => {
                let manager = DeviceManager::new();
                println!("Host: {}", manager.host_name());
                for device in manager.list_devices()? {
                    println!(
                        "{} {} ({} ch, {} Hz)",
                        if device.is_default { "*" } else { " " },
                        device.name,
                        device.max_channels,
                        device.default_sample_rate
                    );
                }
            }
            Commands::Config { action } => match action {
                ConfigAction::Show => {
                    let config = self.config();
                    let text = toml::to_string_pretty(&config).map_err(ConfigError::from)?;
                    if let Some(manager) = &self.config_manager {
                        println!("# {}", manager.config_path().display());
                    }
                    print!("{}", text);
                }
                ConfigAction::Reset => match self.config_manager.as_mut() {
                    Some(manager) => {
                        manager.reset_to_defaults()?;
                        println!("Configuration reset: {}", manager.config_path().display());
                    }
                    None => {
                        let mut manager = ConfigManager::new()?;
                        manager.reset_to_defaults()?;
                        println!("Configuration reset: {}", manager.config_path().display());
                    }
                },
            },
        }
        Ok(())
    }

    /// Print a status line every 100ms until the sound finishes or Ctrl-C
    async fn watch<F>(&self, label: &str, poll: F)
    where
        F: Fn() -> (PlaybackStatus, MsPosition),
    {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            interval.tick().await;

            if self.shutdown_flag.load(Ordering::Relaxed) {
                println!("\nInterrupted.");
                return;
            }

            let (status, position) = poll();
            print!("\r{}", CliApp::status_line(label, status, position));
            let _ = io::stdout().flush();
            if status.is_finished() {
                println!();
                return;
            }
        }
    }

    /// Report an error with its recovery suggestions
    pub fn handle_error(&self, error: &EngineError) {
        log!(error.severity().log_level(), "{}", error);
        eprintln!("Error: {}", error.user_message());
        let suggestions = error.recovery_suggestions();
        if !suggestions.is_empty() {
            eprintln!("Suggestions:");
            for suggestion in suggestions {
                eprintln!("  - {}", suggestion);
            }
        }
    }
}

fn label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[tokio::main]
async fn main() {
    let cli = CliApp::parse();
    let mut controller = AppController::new(cli.distinct_status);

    if let Err(e) = controller.execute_command(cli.command).await {
        controller.handle_error(&e);
        std::process::exit(1);
    }
}
