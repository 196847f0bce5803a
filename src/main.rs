mod classify;
mod config;
mod events;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;

use dockscope_docker::{DaemonHost, DockerClient, EventsQuery};
use dockscope_logs::LevelClassifier;

use crate::config::Config;

/// Dockscope - Docker-compatible event stream and container log level tools
#[derive(Parser, Debug)]
#[command(name = "dockscope")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "DOCKSCOPE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow daemon events, with Podman health events in Docker's vocabulary
    Events {
        /// Daemon address, e.g. unix:///run/podman/podman.sock (defaults to DOCKER_HOST)
        #[arg(long, short = 'H', value_name = "URL")]
        host: Option<String>,

        /// Replay events since this Unix timestamp
        #[arg(long, value_name = "TIMESTAMP")]
        since: Option<i64>,

        /// Stop at this Unix timestamp
        #[arg(long, value_name = "TIMESTAMP")]
        until: Option<i64>,

        /// Fail when the daemon sends nothing for this many seconds
        #[arg(long, value_name = "SECS")]
        idle_timeout: Option<u64>,
    },

    /// Tag log lines with their detected level
    Classify {
        /// Log file to read (stdin if omitted)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        /// Only print lines at these levels (comma separated)
        #[arg(long, short, value_delimiter = ',')]
        levels: Vec<String>,

        /// Only print lines matching this regex
        #[arg(long, short)]
        pattern: Option<String>,

        /// Match the pattern case-insensitively
        #[arg(long, short = 'i')]
        ignore_case: bool,

        /// Print the lines the filter would drop instead
        #[arg(long)]
        invert: bool,
    },

    /// List the supported level names
    Levels {
        /// Print as a JSON array
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Events {
            host,
            since,
            until,
            idle_timeout,
        } => {
            let mut settings = config.docker.stream_settings();
            if let Some(secs) = idle_timeout {
                settings.idle_timeout = Some(std::time::Duration::from_secs(secs));
            }
            let client = match host.or(config.docker.host.clone()) {
                Some(host) => DockerClient::new(host.parse::<DaemonHost>()?, settings),
                None => DockerClient::from_env(settings)?,
            };
            follow_events(&client, EventsQuery { since, until }).await
        }

        Command::Classify {
            file,
            levels,
            pattern,
            ignore_case,
            invert,
        } => {
            let classifier = LevelClassifier::new()?;
            let levels = if levels.is_empty() {
                config.classify.levels
            } else {
                levels
            };
            let pattern = pattern.or(config.classify.pattern);
            let filter = classify::build_filter(
                &classifier,
                pattern.as_deref(),
                ignore_case || config.classify.case_insensitive,
                &levels,
                invert,
            )?;

            let mut out = std::io::stdout();
            let summary = match file {
                Some(path) => {
                    let input = tokio::fs::File::open(&path)
                        .await
                        .with_context(|| format!("Failed to open {}", path.display()))?;
                    let source = path.display().to_string();
                    classify::classify_lines(BufReader::new(input), &mut out, &source, &classifier, &filter)
                        .await?
                }
                None => {
                    let input = BufReader::new(tokio::io::stdin());
                    classify::classify_lines(input, &mut out, "stdin", &classifier, &filter).await?
                }
            };
            tracing::info!(
                read = summary.read,
                printed = summary.printed,
                unknown = summary.unknown,
                "done"
            );
            Ok(())
        }

        Command::Levels { json } => {
            let classifier = LevelClassifier::new()?;
            let levels = classify::vocabulary(&classifier);
            if json {
                println!("{}", serde_json::to_string(&levels)?);
            } else {
                for level in levels {
                    println!("{level}");
                }
            }
            Ok(())
        }
    }
}

async fn follow_events(client: &DockerClient, query: EventsQuery) -> Result<()> {
    let response = client
        .events(&query)
        .await
        .with_context(|| format!("Failed to follow events from {}", client.host()))?;

    let mut out = std::io::stdout();
    tokio::select! {
        result = events::copy_events(response.into_body(), &mut out) => {
            let lines = result?;
            tracing::debug!(lines, "event stream ended");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::debug!("interrupted");
        }
    }
    Ok(())
}
