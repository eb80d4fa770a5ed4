use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use curbside_core::{
    current_time_label, is_weekend, validate_identifier, Classifier, Clock, CurbsideError, Outcome,
    SystemClock,
};
use curbside_dispatch::with_timeout;
use curbside_ingest::{
    DataChatClient, ForecastProvider, IncidentFeed, ObjectStore, ObjectUri, ReplyFragment,
};

mod config;
mod logging;
mod render;
mod services;
mod state;

use config::{config_path, init_config, load_config, Config};
use services::Services;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CURBSIDE_BUILD_SHA"), ")");

#[derive(Parser, Debug)]
#[command(name = "curbside", version = VERSION, about = "Bus-stop maintenance scheduling")]
struct Cli {
    /// Print tagged JSON outcomes instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List open incidents
    Incidents,

    /// Passenger-load forecast for one or more bus stops
    Forecast {
        #[arg(required = true)]
        stop_ids: Vec<String>,
    },

    /// Classify an incident report without scheduling anything
    Classify { text: String },

    /// Plan a scheduling turn without committing it
    Plan {
        /// Local agency time to plan from, "YYYY-MM-DD HH:MM" (default: now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Run a scheduling turn and commit its decisions
    Schedule {
        #[arg(long)]
        at: Option<String>,
    },

    /// Ask a question about bus-stop data in plain language
    Ask {
        question: String,

        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Download an incident image (gs://bucket/object)
    Image {
        uri: String,

        /// Output file (default: the object's file name)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Current agency time
    Now,

    /// Manage ~/.curbside/config.toml
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write the default config if none exists
    Init,
    /// Print the effective config (file plus environment)
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let json = cli.json;
    if let Err(e) = run(cli).await {
        if !json {
            return Err(e);
        }
        let err = match e.downcast::<CurbsideError>() {
            Ok(ce) => ce,
            Err(other) => CurbsideError::InvalidInput(format!("{other:#}")),
        };
        render::print_json(&Outcome::<Value>::error(&err))?;
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let json = cli.json;

    match cli.command {
        Command::Config { command } => match command {
            ConfigCommand::Init => init_config()?,
            ConfigCommand::Show => {
                let cfg = load_config()?;
                println!("# {}", config_path()?.display());
                print!("{}", toml::to_string_pretty(&cfg).context("serialize config")?);
            }
        },

        Command::Classify { text } => {
            let c = Classifier::new()?.classify(&text);
            if json {
                render::print_json(&Outcome::success(json!({
                    "classification": c,
                    "estimated_minutes": c.work.estimated_minutes(),
                })))?;
            } else {
                render::classification(&c);
            }
        }

        Command::Now => {
            let tz = load_config()?.timezone()?;
            let now = SystemClock { tz }.now();
            let weekend = is_weekend(now.date_naive());
            if json {
                render::print_json(&Outcome::success(json!({
                    "now": now.fixed_offset(),
                    "label": current_time_label(&now),
                    "timezone": tz.name(),
                    "weekend": weekend,
                })))?;
            } else {
                println!("{} {}", current_time_label(&now), tz.name());
                if weekend {
                    println!("(weekend)");
                }
            }
        }

        Command::Incidents => {
            let cfg = load_config()?;
            let services = Services::build(&cfg, None)?;
            let list = with_timeout("incident feed", services.timeout, services.feed.list_open_incidents()).await?;
            if json {
                render::print_json(&Outcome::success(json!({ "incidents": list })))?;
            } else {
                render::incidents(&list);
            }
        }

        Command::Forecast { stop_ids } => {
            for id in &stop_ids {
                validate_identifier("bus stop id", id)?;
            }
            let cfg = load_config()?;
            let services = Services::build(&cfg, None)?;
            let map = with_timeout("forecast", services.timeout, services.forecast.forecast(&stop_ids)).await?;
            if json {
                render::print_json(&Outcome::success(json!({ "forecasts": map })))?;
            } else {
                render::forecasts(&map, &services.now());
            }
        }

        Command::Plan { at } => run_turn(at.as_deref(), true, json).await?,
        Command::Schedule { at } => run_turn(at.as_deref(), false, json).await?,

        Command::Ask { question, conversation } => {
            let cfg = load_config()?;
            let client = services::data_chat(&cfg)?;
            let mut on_fragment = |f: ReplyFragment| {
                if !json {
                    if let ReplyFragment::Text(t) = f {
                        println!("{t}");
                    }
                }
            };
            let answer = client
                .ask(&question, conversation.as_deref(), &mut on_fragment)
                .await?;
            if json {
                render::print_json(&Outcome::success(json!({ "answer": answer })))?;
            } else {
                // Every executed query is shown, even when the reply text omits it.
                if !answer.queries.is_empty() {
                    println!("\nQueries executed:");
                    for q in &answer.queries {
                        println!("---\n{}", q.trim());
                    }
                }
                if !answer.charts.is_empty() {
                    println!("\n{} chart spec(s) returned (use --json to see them)", answer.charts.len());
                }
            }
        }

        Command::Image { uri, out } => {
            let uri = ObjectUri::parse(&uri)?;
            let cfg = load_config()?;
            let store = services::object_store(&cfg)?;
            let limit = Duration::from_secs(cfg.runtime.adapter_timeout_secs);
            match with_timeout("image fetch", limit, store.fetch(&uri)).await? {
                None => {
                    if json {
                        render::print_json(&Outcome::warning(
                            format!("no object at {uri}"),
                            json!({ "uri": uri.to_string() }),
                        ))?;
                    } else {
                        println!("No image at {uri}");
                    }
                }
                Some(blob) => {
                    let path = out.unwrap_or_else(|| PathBuf::from(uri.file_name()));
                    std::fs::write(&path, &blob.bytes).with_context(|| format!("write {}", path.display()))?;
                    info!(%uri, bytes = blob.bytes.len(), "image saved");
                    if json {
                        render::print_json(&Outcome::success(json!({
                            "uri": uri.to_string(),
                            "path": path,
                            "bytes": blob.bytes.len(),
                            "mime_type": blob.mime_type,
                        })))?;
                    } else {
                        println!("Saved {} ({}, {} bytes)", path.display(), blob.mime_type, blob.bytes.len());
                    }
                }
            }
        }
    }

    Ok(())
}

async fn run_turn(at: Option<&str>, dry_run: bool, json: bool) -> Result<()> {
    let cfg: Config = load_config()?;
    let services = Services::build(&cfg, at)?;
    let turn = services.turn(&cfg, dry_run)?;
    let report = turn.run(&services.now()).await?;

    if json {
        let outcome = if report.count("error") > 0 {
            Outcome::warning("some decisions were not committed", &report)
        } else {
            Outcome::success(&report)
        };
        render::print_json(&outcome)?;
    } else {
        render::turn(&report, services.tz);
        if services.mock && !dry_run {
            println!("(mock mode: commits went to an in-memory store)");
        }
    }
    Ok(())
}
