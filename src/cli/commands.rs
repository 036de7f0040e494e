//! CLI command definitions and handlers.
//!
//! Each subcommand is implemented as a function that takes the parsed arguments
//! and returns an `anyhow::Result<()>`.

use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, never, select, unbounded};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crate::config::{self, Config, ConfigError, PlaybackConfig};
use crate::error::{Error, Result};
use crate::player::{
    Player, PlayerEvent, PlayerOptions, PlayerState, SymphoniaEngine, format_ms,
    list_audio_devices, mix,
};
use crate::resume::{PositionStore, normalize_path};

/// Gain range offered by the `+`/`-` keys, in dB.
const GAIN_LIMIT_DB: f64 = 20.0;

/// Playdeck CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "PLAYDECK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Play a file, reading control commands from stdin
    Play {
        /// Media file to play
        path: PathBuf,
        /// Signal gain in dB
        #[arg(long, allow_hyphen_values = true)]
        gain: Option<f64>,
        /// Monitor volume (0-100)
        #[arg(long)]
        volume: Option<f64>,
        /// Neither restore nor record the playback position
        #[arg(long)]
        no_resume: bool,
    },
    /// Inspect or clear saved playback positions
    Resume {
        #[command(subcommand)]
        action: ResumeAction,
    },
    /// Print the engine volume for a gain and monitor volume
    Mix {
        /// Signal gain in dB
        #[arg(allow_hyphen_values = true)]
        gain_db: f64,
        /// Monitor volume (0-100)
        #[arg(long, default_value = "100")]
        volume: f64,
    },
    /// Show or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List audio output devices
    Devices,
}

#[derive(Subcommand)]
pub enum ResumeAction {
    /// List all saved positions
    List,
    /// Show the saved position for a file
    Show { path: PathBuf },
    /// Forget the saved position for a file
    Clear { path: PathBuf },
    /// Forget every saved position
    ClearAll,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the config file location
    Path,
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    };

    match &cli.command {
        Commands::Play {
            path,
            gain,
            volume,
            no_resume,
        } => cmd_play(&config, path, *gain, *volume, *no_resume),
        Commands::Resume { action } => cmd_resume(&config, action),
        Commands::Mix { gain_db, volume } => {
            println!("{}", mix(*gain_db, *volume));
            Ok(())
        }
        Commands::Config { action } => cmd_config(cli.config.as_deref(), &config, action),
        Commands::Devices => {
            cmd_devices();
            Ok(())
        }
    }
}

// ============================================================================
// Individual command implementations
// ============================================================================

fn cmd_play(
    config: &Config,
    path: &Path,
    gain: Option<f64>,
    volume: Option<f64>,
    no_resume: bool,
) -> anyhow::Result<()> {
    let path = existing_file(path)?;
    let store = Arc::new(open_store(config)?);

    let mut options = PlayerOptions::from(config);
    if let Some(gain) = gain {
        options.gain_db = gain;
    }
    if let Some(volume) = volume {
        options.volume_percent = volume.clamp(0.0, 100.0);
    }
    if no_resume {
        options.remember_position = false;
    }

    let device = config.audio.output_device.clone();
    let player = Player::spawn(move || SymphoniaEngine::new(&device), store, options)?;
    player.load(&path)?;
    player.play()?;

    println!("Playing: {}", path.display());
    println!("Keys: p pause/play, s stop, f/b seek, F/B fast seek, +/- gain, v <pct>, j <0-1>, q quit");

    let mut input = Some(spawn_stdin_reader());

    loop {
        let lines = input.clone().unwrap_or_else(never);
        select! {
            recv(player.events()) -> event => match event {
                Ok(event) => {
                    let state = print_event(&event);
                    // Without stdin nobody can restart playback
                    if input.is_none()
                        && matches!(state, Some(PlayerState::Finished | PlayerState::Error))
                    {
                        break;
                    }
                }
                Err(_) => break,
            },
            recv(lines) -> line => match line {
                Ok(line) => match parse_line(&line, &config.playback) {
                    Some(LineCommand::Quit) => break,
                    Some(command) => apply_line_command(&player, command)?,
                    None if line.trim().is_empty() => {}
                    None => eprintln!("\nUnknown command: {}", line.trim()),
                },
                Err(_) => input = None,
            },
        }
    }

    println!();
    player.release()?;
    player.wait();
    Ok(())
}

fn cmd_resume(config: &Config, action: &ResumeAction) -> anyhow::Result<()> {
    let store = open_store(config)?;

    match action {
        ResumeAction::List => {
            let entries = store.entries();
            if entries.is_empty() {
                println!("No saved positions.");
            }
            for (key, entry) in entries {
                let marker = if entry.is_resumable() { " " } else { "x" };
                println!(
                    "{} {:>9} / {:<9} {}",
                    marker,
                    format_ms(entry.position_ms.max(0) as u64),
                    format_ms(entry.duration_ms.max(0) as u64),
                    key
                );
            }
        }
        ResumeAction::Show { path } => match store.entry(path) {
            Some(entry) => {
                println!("Position: {}", format_ms(entry.position_ms.max(0) as u64));
                println!("Duration: {}", format_ms(entry.duration_ms.max(0) as u64));
                if !entry.last_seen.is_empty() {
                    println!("Last seen: {}", entry.last_seen);
                }
                match store.get_position(path) {
                    Some(ms) => println!("Resumes at {}", format_ms(ms)),
                    None => println!("Starts from the beginning"),
                }
            }
            None => println!("No saved position for {}", path.display()),
        },
        ResumeAction::Clear { path } => {
            store.clear(path);
            let key = normalize_path(path).unwrap_or_else(|| path.display().to_string());
            println!("Cleared {}", key);
        }
        ResumeAction::ClearAll => {
            let count = store.entries().len();
            store.clear_all();
            println!("Cleared {} saved positions", count);
        }
    }
    Ok(())
}

fn cmd_config(
    explicit_path: Option<&Path>,
    config: &Config,
    action: &ConfigAction,
) -> anyhow::Result<()> {
    let path = match explicit_path {
        Some(path) => path.to_path_buf(),
        None => config::config_path().ok_or(Error::Config(ConfigError::NoConfigDir))?,
    };

    match action {
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Show => print!("{}", toml::to_string_pretty(config)?),
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config::save_to(&Config::default(), &path).map_err(Error::from)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn cmd_devices() {
    let devices = list_audio_devices();
    if devices.is_empty() {
        println!("No audio output devices found.");
        return;
    }
    for device in devices {
        println!("{}", device);
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn existing_file(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(Error::not_found(path))
    }
}

fn open_store(config: &Config) -> Result<PositionStore> {
    let file = config
        .playback
        .state_file_path()
        .ok_or(ConfigError::NoConfigDir)?;
    Ok(PositionStore::open(file))
}

/// Forward stdin lines to a channel; the channel closes at end of input.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Keyboard control unavailable: {}", e);
    }
    rx
}

/// Print a notification; returns the new state for state changes.
fn print_event(event: &PlayerEvent) -> Option<PlayerState> {
    match event {
        PlayerEvent::StateChanged(state) => {
            println!("\n[{}]", state);
            Some(*state)
        }
        PlayerEvent::TimeChanged {
            current_ms,
            total_ms,
        } => {
            print!("\r{} / {}   ", format_ms(*current_ms), format_ms(*total_ms));
            let _ = std::io::stdout().flush();
            None
        }
        PlayerEvent::MediaParsed(info) => {
            let kind = if info.has_video { "video" } else { "audio" };
            println!("\n{} ({}, {})", info.path.display(), kind, format_ms(info.duration_ms));
            None
        }
    }
}

/// One line of keyboard input.
#[derive(Debug, Clone, PartialEq)]
enum LineCommand {
    Toggle,
    Stop,
    Seek(i64),
    GainStep(f64),
    Volume(f64),
    Jump(f32),
    Quit,
}

fn parse_line(line: &str, playback: &PlaybackConfig) -> Option<LineCommand> {
    let mut parts = line.split_whitespace();
    let key = parts.next()?;
    let arg = parts.next();

    let step = playback.seek_interval_ms as i64;
    let fast = playback.fast_seek_interval_ms as i64;

    let command = match key {
        "p" => LineCommand::Toggle,
        "s" => LineCommand::Stop,
        "f" => LineCommand::Seek(step),
        "b" => LineCommand::Seek(-step),
        "F" => LineCommand::Seek(fast),
        "B" => LineCommand::Seek(-fast),
        "+" => LineCommand::GainStep(1.0),
        "-" => LineCommand::GainStep(-1.0),
        "v" => LineCommand::Volume(arg?.parse().ok()?),
        "j" => LineCommand::Jump(arg?.parse().ok()?),
        "q" => LineCommand::Quit,
        _ => return None,
    };
    Some(command)
}

fn apply_line_command(player: &Player, command: LineCommand) -> Result<()> {
    match command {
        LineCommand::Toggle => player.toggle_play_pause()?,
        LineCommand::Stop => player.stop()?,
        LineCommand::Seek(delta) => player.seek_by(delta)?,
        LineCommand::GainStep(delta) => {
            let gain = (player.snapshot().gain_db + delta).clamp(-GAIN_LIMIT_DB, GAIN_LIMIT_DB);
            println!("\nGain {:+.0} dB", gain);
            player.set_gain_db(gain)?;
        }
        LineCommand::Volume(percent) => player.set_volume_percent(percent)?,
        LineCommand::Jump(fraction) => player.set_position(fraction)?,
        LineCommand::Quit => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resume::STATE_FILE_NAME;

    #[test]
    fn test_parse_transport_keys() {
        let playback = PlaybackConfig::default();
        assert_eq!(parse_line("p", &playback), Some(LineCommand::Toggle));
        assert_eq!(parse_line("  s  ", &playback), Some(LineCommand::Stop));
        assert_eq!(parse_line("q", &playback), Some(LineCommand::Quit));
        assert_eq!(parse_line("", &playback), None);
        assert_eq!(parse_line("x", &playback), None);
    }

    #[test]
    fn test_parse_seek_uses_configured_intervals() {
        let playback = PlaybackConfig {
            seek_interval_ms: 3000,
            fast_seek_interval_ms: 30_000,
            ..Default::default()
        };
        assert_eq!(parse_line("f", &playback), Some(LineCommand::Seek(3000)));
        assert_eq!(parse_line("b", &playback), Some(LineCommand::Seek(-3000)));
        assert_eq!(parse_line("F", &playback), Some(LineCommand::Seek(30_000)));
        assert_eq!(parse_line("B", &playback), Some(LineCommand::Seek(-30_000)));
    }

    #[test]
    fn test_parse_arguments() {
        let playback = PlaybackConfig::default();
        assert_eq!(parse_line("v 40", &playback), Some(LineCommand::Volume(40.0)));
        assert_eq!(parse_line("j 0.5", &playback), Some(LineCommand::Jump(0.5)));
        assert_eq!(parse_line("v", &playback), None);
        assert_eq!(parse_line("j half", &playback), None);
        assert_eq!(parse_line("-", &playback), Some(LineCommand::GainStep(-1.0)));
    }

    #[test]
    fn test_cli_parses_negative_gain() {
        let cli = Cli::try_parse_from(["playdeck", "mix", "-6"]).unwrap();
        match cli.command {
            Commands::Mix { gain_db, volume } => {
                assert_eq!(gain_db, -6.0);
                assert_eq!(volume, 100.0);
            }
            _ => panic!("expected mix"),
        }
    }

    #[test]
    fn test_cli_play_flags() {
        let cli = Cli::try_parse_from([
            "playdeck", "play", "a.mp3", "--gain", "-3", "--volume", "50", "--no-resume",
        ])
        .unwrap();
        match cli.command {
            Commands::Play {
                path,
                gain,
                volume,
                no_resume,
            } => {
                assert_eq!(path, PathBuf::from("a.mp3"));
                assert_eq!(gain, Some(-3.0));
                assert_eq!(volume, Some(50.0));
                assert!(no_resume);
            }
            _ => panic!("expected play"),
        }
    }

    #[test]
    fn test_existing_file_reports_missing() {
        let err = existing_file(Path::new("/nonexistent/movie.mkv")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_open_store_uses_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.playback.state_file = Some(dir.path().join(STATE_FILE_NAME));

        let store = open_store(&config).unwrap();
        assert_eq!(store.file(), Some(dir.path().join(STATE_FILE_NAME).as_path()));
    }

    #[test]
    fn test_config_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let action = ConfigAction::Init { force: false };

        cmd_config(Some(&path), &Config::default(), &action).unwrap();
        assert!(path.exists());
        assert!(cmd_config(Some(&path), &Config::default(), &action).is_err());
        cmd_config(Some(&path), &Config::default(), &ConfigAction::Init { force: true }).unwrap();
    }
}
