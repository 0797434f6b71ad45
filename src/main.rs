use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use guild_jukebox::cli::{
    CliApp, ConfigAction, ConsoleDirective, ConsoleInput, ParseError, StatusDisplay,
};
use guild_jukebox::commands::{CommandContext, CommandHandler};
use guild_jukebox::config::ConfigManager;
use guild_jukebox::coordinator::PlaybackCoordinator;
use guild_jukebox::error::JukeboxError;
use guild_jukebox::logging::JukeboxLogger;
use guild_jukebox::models::SessionId;
use guild_jukebox::notifier::{ConsoleNotifier, Notifier};
use guild_jukebox::output::{AudioOutput, SimulatedOutput};
use guild_jukebox::resolver::{OfflineResolver, Resolver, YtDlpResolver};
use log::{info, warn};

const DEFAULT_SIMULATED_TRACK_SECS: u64 = 30;

/// Wires the coordinator to the console: typed lines become chat commands
pub struct AppController {
    handler: Arc<CommandHandler>,
    config_manager: ConfigManager,
    cli_app: CliApp,
    logger: JukeboxLogger,
    prefix: String,
}

impl AppController {
    /// Must be called inside the tokio runtime
    pub fn new(cli_app: CliApp) -> Result<Self, JukeboxError> {
        // Initialize logging first (default to 'warn' so replies stay readable)
        if std::env::var("JUKEBOX_LOG_LEVEL").is_err() {
            std::env::set_var("JUKEBOX_LOG_LEVEL", "warn");
        }
        if let Err(e) = JukeboxLogger::init() {
            eprintln!("Warning: Failed to initialize logging: {}", e);
        }

        let config_manager = match &cli_app.config {
            Some(path) => ConfigManager::with_path(CliApp::expand_path(path))?,
            None => ConfigManager::new()?,
        };
        let config = config_manager.get_config().clone();
        let track_secs = config.simulated_track_secs.unwrap_or(DEFAULT_SIMULATED_TRACK_SECS);

        let output: Arc<dyn AudioOutput> =
            Arc::new(SimulatedOutput::new(Duration::from_secs(track_secs)));
        let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier::new());
        let resolver: Arc<dyn Resolver> = if cli_app.offline {
            Arc::new(OfflineResolver::new(track_secs))
        } else {
            Arc::new(YtDlpResolver::new(config.ytdlp_path.clone(), config.search_prefix.clone()))
        };

        let logger = JukeboxLogger::new();
        let coordinator = PlaybackCoordinator::new(
            config.clone(),
            output.clone(),
            notifier.clone(),
            logger.clone(),
        );
        let prefix = config.command_prefix.clone();
        let handler = Arc::new(CommandHandler::new(coordinator, resolver, output, notifier, config));

        info!("Application controller initialized successfully");

        Ok(Self {
            handler,
            config_manager,
            cli_app,
            logger,
            prefix,
        })
    }

    fn context(&self) -> CommandContext {
        CommandContext::new(
            self.cli_app.session(),
            self.cli_app.user.clone(),
            self.cli_app.voice_context(),
        )
    }

    /// Returns false when the console should exit
    fn execute_directive(&mut self, directive: ConsoleDirective) -> bool {
        match directive {
            ConsoleDirective::SwitchGuild(id) => {
                self.cli_app.guild = id;
                println!("Commands now go to {}", SessionId(id));
            }
            ConsoleDirective::Voice(present) => {
                self.cli_app.no_voice = !present;
                if present {
                    println!("{} joined voice channel '{}'", self.cli_app.user, self.cli_app.voice_channel);
                } else {
                    println!("{} left the voice channel", self.cli_app.user);
                }
            }
            ConsoleDirective::Sessions => {
                let coordinator = self.handler.coordinator();
                println!("{} session(s) tracked", coordinator.session_count());
                for session in coordinator.session_ids() {
                    println!("{}", StatusDisplay::session_summary(session, &coordinator.inspect(session)));
                }
            }
            ConsoleDirective::Stats => {
                StatusDisplay::display_statistics(&self.logger.get_event_statistics());
            }
            ConsoleDirective::Config(action) => {
                if let Err(e) = self.apply_config_action(action) {
                    StatusDisplay::display_error(&e);
                }
            }
            ConsoleDirective::Exit => {
                println!("Goodbye!");
                return false;
            }
        }
        true
    }

    fn apply_config_action(&mut self, action: ConfigAction) -> Result<(), JukeboxError> {
        let saved = match action {
            ConfigAction::Show => false,
            ConfigAction::Prefix(prefix) => {
                self.config_manager.set_command_prefix(&prefix)?;
                true
            }
            ConfigAction::Timeout(seconds) => {
                self.config_manager.set_resolve_timeout(seconds)?;
                true
            }
            ConfigAction::Reset => {
                self.config_manager.reset_to_defaults()?;
                true
            }
        };

        println!(
            "{}",
            StatusDisplay::config_summary(
                self.config_manager.get_config(),
                self.config_manager.config_path()
            )
        );
        if saved {
            info!("Configuration saved to {}", self.config_manager.config_path().display());
            println!("Saved. Changes apply the next time the jukebox starts.");
        }
        Ok(())
    }

    /// Run interactive mode
    pub async fn run_interactive_mode(&mut self) -> Result<(), JukeboxError> {
        println!("Guild Jukebox v0.1.0");
        println!("Type '{}help' for chat commands, 'exit' or 'quit' to quit.", self.prefix);
        println!();

        // Set up graceful shutdown handling
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let shutdown_flag_clone = shutdown_flag.clone();

        if let Err(e) = ctrlc::set_handler(move || {
            println!("\nReceived interrupt signal. Shutting down gracefully...");
            shutdown_flag_clone.store(true, Ordering::Relaxed);
        }) {
            warn!("Could not install Ctrl-C handler: {}", e);
        }

        // Non-blocking input with 100ms polling using a dedicated stdin thread
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(line.trim().to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        loop {
            if shutdown_flag.load(Ordering::Relaxed) {
                break;
            }

            tokio::select! {
                biased;

                line = rx.recv() => {
                    let Some(line) = line else {
                        // EOF
                        println!();
                        break;
                    };
                    if line.is_empty() {
                        continue;
                    }
                    match CliApp::parse_console_line(&line, &self.prefix) {
                        Ok(ConsoleInput::Chat(command)) => {
                            // Commands run concurrently, like messages arriving from many users.
                            let handler = self.handler.clone();
                            let ctx = self.context();
                            tokio::spawn(async move {
                                handler.handle(&ctx, command).await;
                            });
                        }
                        Ok(ConsoleInput::Directive(directive)) => {
                            if !self.execute_directive(directive) {
                                break;
                            }
                        }
                        Err(ParseError::NotACommand) => {
                            println!("Chat commands start with '{}'. Type '{}help' for help.", self.prefix, self.prefix);
                        }
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            CliApp::display_help(&self.prefix);
                        }
                    }
                }

                _ = interval.tick() => {
                    self.handler.coordinator().prune_idle_sessions();
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stop every session that still has something queued or playing
    pub async fn shutdown(&mut self) {
        println!("Shutting down...");
        let coordinator = self.handler.coordinator();
        for session in coordinator.session_ids() {
            if !coordinator.inspect(session).is_idle() {
                coordinator.stop(session).await;
            }
        }
        println!("Shutdown complete.");
    }
}

#[tokio::main]
async fn main() {
    let cli = CliApp::parse();

    let mut app = match AppController::new(cli) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to initialize application: {}", e);
            StatusDisplay::display_error(&e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run_interactive_mode().await {
        StatusDisplay::display_error(&e);
        std::process::exit(1);
    }

    info!("Application shutdown complete");
}
