use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use checkin_compare::app::{self, AppContext, ComposeRequest};
use checkin_compare::bridge::PublishOutcome;
use checkin_compare::config::Config;
use checkin_compare::points::{self, Filter};
use checkin_compare::status;
use checkin_compare::watcher::{ConnectivityWatcher, WatcherState};

#[derive(Parser)]
#[command(
    name = "checkin-compare",
    version,
    about = "Align a check-in photo against a reference shot and publish the comparison"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Composite a photo against a point's reference screenshot
    Compose {
        /// Point id from the catalogue
        #[arg(long)]
        point: String,
        /// User photo to overlay
        #[arg(long)]
        overlay: String,
        /// Reference image (defaults to the point's screenshot)
        #[arg(long)]
        reference: Option<String>,
        #[arg(long)]
        scale: Option<f32>,
        #[arg(long, allow_negative_numbers = true)]
        offset_x: Option<f32>,
        #[arg(long, allow_negative_numbers = true)]
        offset_y: Option<f32>,
        #[arg(long)]
        crop: Option<f32>,
        /// JSON gesture script replayed through the interaction controller
        #[arg(long)]
        gestures: Option<PathBuf>,
        /// Write the composite JPEG here
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Skip uploading
        #[arg(long)]
        no_upload: bool,
    },
    /// Retry queued uploads now
    Flush,
    /// Watch connectivity and upload queued composites when it returns
    Watch,
    /// List points, optionally filtered
    Points {
        #[arg(short, long, default_value = "")]
        query: String,
        #[arg(long)]
        checked: bool,
        #[arg(long)]
        unchecked: bool,
    },
    /// Mark a point as visited without a photo
    Checkin { point: String },
    /// Delete a point's composite (the check-in stays)
    Remove {
        point: String,
        /// Also withdraw the check-in
        #[arg(long)]
        uncheck: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    // Initialize logging with level from config
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.settings.log_level)),
        )
        .init();

    tracing::info!("checkin-compare v{} starting", env!("CARGO_PKG_VERSION"));

    let ctx = AppContext::init(config).await?;

    match cli.command {
        Command::Compose {
            point,
            overlay,
            reference,
            scale,
            offset_x,
            offset_y,
            crop,
            gestures,
            out,
            no_upload,
        } => {
            let gestures = match gestures {
                Some(path) => app::read_gestures(&path)?,
                None => Vec::new(),
            };
            let offset = match (offset_x, offset_y) {
                (None, None) => None,
                (x, y) => Some((x.unwrap_or(0.0), y.unwrap_or(0.0))),
            };
            let outcome = ctx
                .compose(ComposeRequest {
                    point_id: point,
                    reference,
                    overlay,
                    scale,
                    offset,
                    crop_fraction: crop,
                    gestures,
                    upload: !no_upload,
                    output: out,
                })
                .await?;

            let c = &outcome.composite;
            println!(
                "Composite {}x{} (scale {:.2}, offset {:.1},{:.1}, crop {:.2})",
                c.width,
                c.height,
                c.transform.scale,
                c.transform.offset_x,
                c.transform.offset_y,
                c.transform.crop_fraction
            );
            match outcome.published {
                Some(PublishOutcome::Uploaded { url }) => println!("Uploaded: {}", url),
                Some(PublishOutcome::Queued { entry_id, .. }) => {
                    println!("Offline: queued as {} (run `flush` or `watch` later)", entry_id)
                }
                None => {}
            }
        }
        Command::Flush => {
            let report = ctx.flush().await?;
            for (point, url) in &report.uploaded {
                println!("  + {} -> {}", point, url);
            }
            for (point, reason) in &report.rejected {
                println!("  x {}: {}", point, reason);
            }
            println!(
                "{} uploaded, {} rejected, {} still pending",
                report.uploaded.len(),
                report.rejected.len(),
                report.remaining
            );
        }
        Command::Watch => watch(ctx).await?,
        Command::Points {
            query,
            checked,
            unchecked,
        } => {
            let all = ctx.load_points()?;
            let filter = Filter {
                query,
                only_checked: checked,
                only_unchecked: unchecked,
                characters: ctx.config.points.characters.clone(),
            };
            let bridge = ctx.bridge.lock().await;
            let checkins = bridge.checkins();
            let shown = filter.apply(&all, checkins);
            if shown.is_empty() {
                println!("No matching points.");
            }
            for p in &shown {
                let mark = match checkins.get(&p.id) {
                    Some(info) if info.has_image => "\x1b[32m+\x1b[0m",
                    Some(_) => "\x1b[33m~\x1b[0m",
                    None => " ",
                };
                println!(
                    "  {} {:<12} {:<24} {:>9.5},{:<10.5} {}",
                    mark,
                    p.id,
                    p.display_name(),
                    p.lat(),
                    p.lng(),
                    p.episode_label()
                );
            }
            let (done, total) = points::progress(&all, checkins);
            println!("\nChecked in {} / {}", done, total);
        }
        Command::Checkin { point } => {
            ctx.bridge.lock().await.check_in(&point).await?;
            println!("Checked in at {}", point);
        }
        Command::Remove { point, uncheck } => {
            if uncheck {
                ctx.bridge.lock().await.cancel_check_in(&point).await?;
                println!("Check-in at {} withdrawn", point);
            } else {
                ctx.remove(&point).await?;
                println!("Composite for {} removed", point);
            }
        }
    }

    Ok(())
}

async fn watch(ctx: AppContext) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let interval = Duration::from_secs(ctx.config.settings.retry_interval);
    let watcher = ConnectivityWatcher::start(ctx.bridge.clone(), interval, cancel.clone());

    // Start HTTP status endpoint if configured
    let status_port = ctx.config.settings.status_port;
    if status_port > 0 {
        let state = watcher.state.clone();
        let bridge = ctx.bridge.clone();
        tokio::spawn(async move {
            if let Err(e) = status::serve_http(state, bridge, status_port).await {
                tracing::error!("Status HTTP server error: {}", e);
            }
        });
        println!("Status: http://localhost:{}/status", status_port);
    }

    // Ctrl+C handler
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutting down...");
        cancel_clone.cancel();
    });

    // Print status periodically until cancelled
    loop {
        if cancel.is_cancelled() {
            break;
        }
        print_terminal_status(&watcher.state);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    println!("\nWatcher stopped.");
    Ok(())
}

fn print_terminal_status(state: &Arc<WatcherState>) {
    print!("\x1b[2J\x1b[H"); // Clear screen, cursor to top
    println!("checkin-compare v{} - watching\n", env!("CARGO_PKG_VERSION"));

    let online = *state.online.lock().unwrap();
    let store = if state.last_probe.lock().unwrap().is_none() {
        "Store: \x1b[33m~\x1b[0m probing".to_string()
    } else if online {
        "Store: \x1b[32m+\x1b[0m online".to_string()
    } else {
        "Store: \x1b[31m-\x1b[0m offline".to_string()
    };

    println!(
        "  {}  |  Pending: {}  |  Uploaded: {}  |  Rejected: {}",
        store,
        *state.pending.lock().unwrap(),
        *state.uploaded.lock().unwrap(),
        *state.rejected.lock().unwrap()
    );
    println!();
}
