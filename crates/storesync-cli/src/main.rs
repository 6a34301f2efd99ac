//! storesync - terminal front end for the storefront sync layer.
//!
//! Warms the cache, keeps the notification badge current and shows the
//! enrollment button a user would see. Useful for checking a backend
//! without the web client.

use std::io;
use std::path::Path;

use anyhow::{bail, Result};
use storesync_core::{ActionVerb, Config, Poller, Settlement, SyncContext};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Prefix for daily-rolling log files under `log_dir`.
const LOG_FILE_PREFIX: &str = "storesync.log";

const USAGE: &str = "\
Usage: storesync [command]

Commands:
  watch [--once]                 Warm the cache and poll notifications (default)
  status <course-id> <user-id>   Show the enrollment button state [--add]
  mark-read <id>                 Mark a notification as read
  delete <id>                    Delete a notification
  reset                          Forget local read marks
  help                           Show this message

Environment:
  STORESYNC_TOKEN   Bearer token for the backend (.env is honored)
  RUST_LOG          Log filter, default \"warn\"";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, and also to a daily file when `log_dir` is set. The
/// returned guard flushes the file writer and must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let loaded = Config::load();
    let _log_guard = init_tracing(
        loaded
            .as_ref()
            .ok()
            .and_then(|config| config.log_dir.as_deref()),
    );
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    info!(api = %config.api_base_url, "storesync starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("watch");

    match command {
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        "watch" => {
            let once = args.iter().any(|a| a == "--once");
            watch(&config, once).await
        }
        "status" => {
            let (Some(course_id), Some(user_id)) = (args.get(1), args.get(2)) else {
                bail!("status needs <course-id> <user-id>\n\n{}", USAGE);
            };
            let verb = if args.iter().any(|a| a == "--add") {
                ActionVerb::Add
            } else {
                ActionVerb::Enroll
            };
            show_status(&config, course_id, user_id, verb).await
        }
        "mark-read" | "delete" => {
            let Some(id) = args.get(1) else {
                bail!("{} needs a notification id\n\n{}", command, USAGE);
            };
            mutate(&config, command, id).await
        }
        "reset" => {
            let ctx = SyncContext::new(&config)?;
            let forgotten = ctx.overlay().len();
            ctx.reset();
            println!("Forgot {} local read marks", forgotten);
            Ok(())
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}

/// Warm the cache, show the badge, then keep it current until Ctrl-C.
async fn watch(config: &Config, once: bool) -> Result<()> {
    let ctx = SyncContext::new(config)?;

    let report = ctx.prefetch_scheduler().run().settled().await;
    println!(
        "Prefetched {} resources ({} failed)",
        report.warmed.len(),
        report.failed.len()
    );
    for key in &report.failed {
        println!("  could not load {}", key);
    }

    let feed = ctx.notification_feed();
    match feed.load().await {
        Ok(items) => println!("{} notifications, {} unread", items.len(), feed.unread_count()),
        Err(e) => println!("Could not load notifications: {}", e),
    }

    for entry in ctx.store().ages() {
        println!(
            "  {:<20} {:<8} {}",
            entry.key,
            entry.freshness.to_string(),
            entry.age_display()
        );
    }

    if once {
        return Ok(());
    }

    let handle = Poller::spawn(feed, config.poll_interval());
    let mut unread = handle.unread();
    println!(
        "Polling every {}s, Ctrl-C to stop",
        config.poll_interval().as_secs()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = unread.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *unread.borrow_and_update();
                println!("Unread: {}", count);
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

async fn show_status(config: &Config, course_id: &str, user_id: &str, verb: ActionVerb) -> Result<()> {
    let ctx = SyncContext::new(config)?;
    let status = ctx.enrollment_status(course_id, user_id).await?;
    let action = storesync_core::derive_action_for(verb, status);

    println!("Status: {}", status);
    println!(
        "Button: [{}] {}{}",
        format!("{:?}", action.icon).to_lowercase(),
        action.label,
        if action.disabled { " (disabled)" } else { "" }
    );
    Ok(())
}

async fn mutate(config: &Config, command: &str, id: &str) -> Result<()> {
    let ctx = SyncContext::new(config)?;
    let feed = ctx.notification_feed();
    feed.load().await?;

    let settlement = if command == "delete" {
        feed.delete(id).await?
    } else {
        feed.mark_as_read(id).await?
    };

    match settlement {
        Settlement::Committed => println!("{}: done", id),
        Settlement::Unchanged => println!("{}: already read", id),
        Settlement::Ignored => println!("{}: another change is in progress", id),
    }
    println!("Unread: {}", feed.unread_count());
    Ok(())
}
