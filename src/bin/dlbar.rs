use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use dlbar_lib::background::{self, BackgroundEvent, BackgroundHandle, BackgroundSnapshot};
use dlbar_lib::downloads::{DownloadEvent, DownloadId, DownloadItem};
use dlbar_lib::messaging::PopupMessage;
use dlbar_lib::platform::{MemoryPlatform, TabInfo};
use dlbar_lib::settings::BackgroundSettings;
use dlbar_lib::toolbar::{self, IconScale, IconState};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug)]
struct CliArgs {
    command: String,
    target: Option<String>,
    format: OutputFormat,
    pretty: bool,
    progress: f64,
    device_pixel_ratio: Option<f64>,
    settings: Option<PathBuf>,
    verbose: bool,
}

/// One scripted step of a replay
#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
enum Step {
    Platform {
        #[serde(default)]
        downloads: Vec<DownloadItem>,
        #[serde(default)]
        tabs: Vec<TabInfo>,
    },
    Upsert {
        download: DownloadItem,
    },
    Remove {
        id: DownloadId,
    },
    Event {
        event: DownloadEvent,
    },
    Popup {
        message: PopupMessage,
    },
    Tick,
    Snapshot {
        #[serde(default)]
        label: Option<String>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotPayload {
    label: String,
    #[serde(flatten)]
    snapshot: BackgroundSnapshot,
}

#[tokio::main]
async fn main() {
    let args = parse_args(std::env::args().skip(1).collect());
    if args.command == "--help" || args.command == "-h" {
        print_help();
        return;
    }
    if args.command == "--version" || args.command == "-V" {
        println!("dlbar {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    if args.verbose {
        dlbar_lib::init_logging();
    }

    let result = match args.command.as_str() {
        "replay" => run_replay(&args).await,
        "render" => run_render(&args),
        _ => Err(anyhow::anyhow!(
            "Unknown command: {}. Use --help for usage.",
            args.command
        )),
    };

    if let Err(err) = result {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn parse_args(mut argv: Vec<String>) -> CliArgs {
    let mut command = String::new();
    let mut target = None;
    let mut format = OutputFormat::Text;
    let mut pretty = false;
    let mut progress = 0.0;
    let mut device_pixel_ratio = None;
    let mut settings = None;
    let mut verbose = false;

    if let Some(first) = argv.first() {
        if !first.starts_with('-') {
            command = argv.remove(0);
        }
    }

    let mut iter = argv.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--format" => {
                if let Some(value) = iter.next() {
                    if value == "json" {
                        format = OutputFormat::Json;
                    } else if value == "text" {
                        format = OutputFormat::Text;
                    }
                }
            }
            "--json" => format = OutputFormat::Json,
            "--pretty" => pretty = true,
            "--progress" => {
                progress = iter
                    .next()
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(progress);
            }
            "--device-pixel-ratio" => {
                device_pixel_ratio = iter.next().and_then(|value| value.parse().ok());
            }
            "--settings" => settings = iter.next().map(PathBuf::from),
            "--verbose" | "-v" => verbose = true,
            "--help" | "-h" | "--version" | "-V" => {
                command = arg;
                break;
            }
            other if !other.starts_with('-') && target.is_none() => {
                target = Some(other.to_string());
            }
            _ => {}
        }
    }

    if command.is_empty() {
        command = "--help".to_string();
    }

    CliArgs {
        command,
        target,
        format,
        pretty,
        progress,
        device_pixel_ratio,
        settings,
        verbose,
    }
}

fn load_settings(args: &CliArgs) -> Result<BackgroundSettings> {
    let mut settings = match &args.settings {
        Some(path) => BackgroundSettings::load(path)?,
        None => BackgroundSettings::default(),
    };
    if let Some(ratio) = args.device_pixel_ratio {
        settings.device_pixel_ratio = ratio;
    }
    settings.validate()?;
    Ok(settings)
}

async fn run_replay(args: &CliArgs) -> Result<()> {
    let path = args
        .target
        .as_ref()
        .context("replay needs a script path")?;
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay script {}", path))?;
    let steps: Vec<Step> = serde_json::from_str(&raw).context("Failed to parse replay script")?;
    let settings = load_settings(args)?;

    let platform = Arc::new(MemoryPlatform::new());
    let mut running: Option<(BackgroundHandle, tokio::task::JoinHandle<()>)> = None;
    let mut payloads = Vec::new();

    for (index, step) in steps.into_iter().enumerate() {
        match step {
            Step::Platform { downloads, tabs } => {
                platform.set_downloads(downloads);
                platform.set_tabs(tabs);
                continue;
            }
            Step::Upsert { download } => {
                platform.upsert_download(download);
                continue;
            }
            Step::Remove { id } => {
                platform.remove_download(id);
                continue;
            }
            _ => {}
        }

        let handle = match &running {
            Some((handle, _)) => handle.clone(),
            None => {
                let (handle, task) = background::spawn(platform.clone(), &settings);
                running = Some((handle.clone(), task));
                handle.settle().await?;
                handle
            }
        };

        match step {
            Step::Event { event } => handle.on_download_event(event)?,
            Step::Popup { message } => handle.on_popup_message(message)?,
            Step::Tick => handle.dispatch(BackgroundEvent::Tick)?,
            Step::Snapshot { label } => {
                let snapshot = handle.settle().await?;
                let label = label.unwrap_or_else(|| format!("step {}", index + 1));
                emit(args, &mut payloads, label, snapshot)?;
                continue;
            }
            Step::Platform { .. } | Step::Upsert { .. } | Step::Remove { .. } => {}
        }
        handle.settle().await?;
    }

    if let Some((handle, task)) = running {
        let snapshot = handle.settle().await?;
        emit(args, &mut payloads, "final".to_string(), snapshot)?;
        handle.shutdown()?;
        task.await.context("Background task panicked")?;
    }

    if args.format == OutputFormat::Json {
        let output = if args.pretty {
            serde_json::to_string_pretty(&payloads)?
        } else {
            serde_json::to_string(&payloads)?
        };
        println!("{output}");
    }
    Ok(())
}

fn emit(
    args: &CliArgs,
    payloads: &mut Vec<SnapshotPayload>,
    label: String,
    snapshot: BackgroundSnapshot,
) -> Result<()> {
    match args.format {
        OutputFormat::Text => println!("{}", format_snapshot(&label, &snapshot)),
        OutputFormat::Json => payloads.push(SnapshotPayload { label, snapshot }),
    }
    Ok(())
}

fn format_snapshot(label: &str, snapshot: &BackgroundSnapshot) -> String {
    let icon = match snapshot.icon {
        IconState::InProgress(progress) => format!("in-progress({:.0}%)", progress * 100.0),
        other => other.label().to_string(),
    };
    format!(
        "[{}] icon={} active={} unseen={} timer={} popup={}",
        label,
        icon,
        snapshot.active_count,
        snapshot.unseen,
        if snapshot.timer_running { "on" } else { "off" },
        if snapshot.popup_open { "open" } else { "closed" },
    )
}

fn run_render(args: &CliArgs) -> Result<()> {
    let state = match args.target.as_deref() {
        Some("default") | None => IconState::Default,
        Some("in-progress") => IconState::InProgress(args.progress),
        Some("finished") => IconState::Finished,
        Some(other) => bail!(
            "Unknown icon state: {}. Expected default, in-progress or finished.",
            other
        ),
    };
    let settings = load_settings(args)?;
    let scale: IconScale = settings.icon_scale();
    let buffer = toolbar::render(state, scale);

    match args.format {
        OutputFormat::Text => print!("{}", toolbar::ascii_art(&buffer)),
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "state": state,
                "size": buffer.size,
                "rgba": buffer.rgba,
            });
            let output = if args.pretty {
                serde_json::to_string_pretty(&payload)?
            } else {
                serde_json::to_string(&payload)?
            };
            println!("{output}");
        }
    }
    Ok(())
}

fn print_help() {
    println!(
        "dlbar {}\n\n\
         Usage:\n  \
         dlbar replay <script.json> [--format text|json] [--pretty] [--settings FILE]\n  \
         dlbar render <default|in-progress|finished> [--progress P] [--device-pixel-ratio R] [--format text|json]\n\n\
         Options:\n  \
         -v, --verbose   Log background activity to stderr\n  \
         -h, --help      Show this help\n  \
         -V, --version   Show version",
        env!("CARGO_PKG_VERSION")
    );
}
