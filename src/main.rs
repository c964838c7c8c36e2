use anyhow::{Context, Result};
use autopace::aggregate::{aggregate_answer_duration, answer_audio_files};
use autopace::card::{Card, CardId, CardTemplate};
use autopace::config::{Config, ProbeFailurePolicy};
use autopace::host::{Notifier, PlayerBackend};
use autopace::player::MpvIpcPlayer;
use autopace::probe::{DurationProber, MpvProber};
use autopace::scheduler::schedule_auto_advance_on;
use autopace::speed::{SpeedAction, SpeedController};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "autopace")]
#[command(version, about = "Measure flashcard answer audio and compute auto-advance delays")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe the duration of media files
    Probe {
        /// Media files to measure
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Measure a card's answer audio and compute its auto-advance delay
    Card {
        /// Answer template, e.g. "{{FrontSide}}<hr id=answer>{{Back}}"
        #[arg(short, long)]
        answer: String,

        /// Note field as NAME=TEXT (repeatable)
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,

        /// Directory holding the card's media files
        #[arg(short, long)]
        media_dir: PathBuf,

        /// Playback speed
        #[arg(short, long, default_value = "1.0")]
        speed: f64,

        /// What to do when a clip cannot be probed: abort, skip
        #[arg(long)]
        on_probe_failure: Option<String>,

        /// Wait for the delay to elapse before exiting
        #[arg(short, long)]
        wait: bool,
    },

    /// Read or change the playback speed of a running mpv
    Speed {
        #[arg(value_enum, default_value = "get")]
        action: SpeedCommand,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SpeedCommand {
    Get,
    Up,
    Down,
    Reset,
}

/// Tooltips and warnings go to the log on the command line.
struct LogNotifier;

impl Notifier for LogNotifier {
    fn tooltip(&self, message: &str) {
        info!("{}", message.replace("<br>", ", "));
    }

    fn warning(&self, title: &str, message: &str) {
        warn!("{}: {}", title, message);
    }
}

fn parse_field(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected NAME=TEXT, got '{s}'"))
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    if path.is_some() {
        config.apply_env_overrides();
    }
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

fn probe_files(config: &Config, files: &[PathBuf]) -> Result<()> {
    let prober = MpvProber::new(config.prober.clone());
    prober.check()?;

    let mut failed = 0;
    for file in files {
        match prober.probe(file) {
            Ok(seconds) => println!("{:>10.3}s  {}", seconds, file.display()),
            Err(e) => {
                failed += 1;
                warn!("{}: {}", file.display(), e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} file(s) could not be probed", failed, files.len());
    }
    Ok(())
}

fn change_speed(config: &Config, command: SpeedCommand) -> Result<()> {
    let player = Arc::new(MpvIpcPlayer::from_config(config));
    let endpoint = player.endpoint().display().to_string();

    let speed = match command {
        SpeedCommand::Get => player.speed(),
        SpeedCommand::Up | SpeedCommand::Down | SpeedCommand::Reset => {
            let action = match command {
                SpeedCommand::Up => SpeedAction::SpeedUp,
                SpeedCommand::Down => SpeedAction::SlowDown,
                _ => SpeedAction::Reset,
            };
            SpeedController::new(config, player, Arc::new(LogNotifier)).run(action)
        }
    }
    .with_context(|| format!("mpv at {endpoint} is not reachable"))?;

    println!("{speed}");
    Ok(())
}

async fn measure_card(
    config: &Config,
    answer: String,
    fields: Vec<(String, String)>,
    media_dir: PathBuf,
    speed: f64,
    wait: bool,
) -> Result<()> {
    let card = Card {
        id: CardId(0),
        ord: 0,
        fields,
    };
    let template = CardTemplate {
        name: "cli".to_string(),
        question_format: String::new(),
        answer_format: answer,
    };

    let files = answer_audio_files(&card, &template);
    info!("Answer references {} unique clip(s)", files.len());

    let prober = MpvProber::new(config.prober.clone());
    let policy = config.on_probe_failure;
    let report = tokio::task::spawn_blocking(move || {
        aggregate_answer_duration(&card, &template, &media_dir, &prober, policy)
    })
    .await
    .context("Duration task panicked")??;

    for result in &report.results {
        match &result.duration {
            Ok(seconds) => println!("{:>10.3}s  {}", seconds, result.filename),
            Err(e) => println!("{:>11}  {} ({})", "failed", result.filename, e),
        }
    }
    println!("Total:  {:.3}s", report.total_seconds);

    let (tx, rx) = oneshot::channel();
    let handle = schedule_auto_advance_on(
        &tokio::runtime::Handle::current(),
        report.total_seconds,
        speed,
        config.silent_card_delay,
        move || {
            let _ = tx.send(());
        },
    )?;
    println!("Delay:  {:.3}s at {}x", handle.delay().as_secs_f64(), speed);

    if wait {
        tokio::select! {
            _ = rx => info!("Auto-advance fired"),
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                info!("Canceled");
            }
        }
    } else {
        handle.cancel();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Probe { files } => probe_files(&config, &files),
        Command::Card {
            answer,
            fields,
            media_dir,
            speed,
            on_probe_failure,
            wait,
        } => {
            if let Some(policy) = on_probe_failure {
                config.on_probe_failure = policy
                    .parse::<ProbeFailurePolicy>()
                    .map_err(|e: String| anyhow::anyhow!(e))?;
            }
            measure_card(&config, answer, fields, media_dir, speed, wait).await
        }
        Command::Speed { action } => change_speed(&config, action),
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field() {
        assert_eq!(
            parse_field("Back=[sound:a.mp3]").unwrap(),
            ("Back".to_string(), "[sound:a.mp3]".to_string())
        );
        assert_eq!(
            parse_field("Expr=a=b").unwrap(),
            ("Expr".to_string(), "a=b".to_string())
        );
        assert!(parse_field("Back").is_err());
        assert!(parse_field("=text").is_err());
    }

    #[test]
    fn test_cli_parses_card_command() {
        let cli = Cli::try_parse_from([
            "autopace",
            "card",
            "--answer",
            "{{Back}}",
            "--field",
            "Back=[sound:clip.mp3]",
            "--media-dir",
            "/media",
            "--speed",
            "2",
        ])
        .unwrap();

        match cli.command {
            Command::Card { fields, speed, .. } => {
                assert_eq!(fields.len(), 1);
                assert_eq!(speed, 2.0);
            }
            _ => panic!("expected card command"),
        }
    }

    #[test]
    fn test_cli_parses_speed_command() {
        let cli = Cli::try_parse_from(["autopace", "speed", "up"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Speed {
                action: SpeedCommand::Up
            }
        ));

        let cli = Cli::try_parse_from(["autopace", "speed"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Speed {
                action: SpeedCommand::Get
            }
        ));

        assert!(Cli::try_parse_from(["autopace", "speed", "faster"]).is_err());
    }

    #[test]
    fn test_speed_without_mpv_fails() {
        let config = Config {
            mpv_socket: PathBuf::from("/nonexistent/autopace-mpv.sock"),
            ..Config::default()
        };
        let err = change_speed(&config, SpeedCommand::Get).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/autopace-mpv.sock"));
    }
}
