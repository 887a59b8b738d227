use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

use offsync::broadcast::{Activation, Host, Notification, NotificationOptions, SubscriberHandle};
use offsync::config::Config;
use offsync::event::{Event, EventHandler};
use offsync::messages::{Inbound, Outbound};
use offsync::net::{HttpClient, Request};
use offsync::worker::OfflineWorker;

#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(about = "Offline-first request cache, action queue and sync agent")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the application shell for the configured version
  Install,
  /// Activate the installed version and drop every other cache generation
  Activate,
  /// Fetch a URL through the cache
  Get {
    url: String,
    /// Accept header to send (`text/html` makes it a navigation)
    #[arg(long)]
    accept: Option<String>,
  },
  /// Send a JSON message, e.g. '{"command":"save-state","state":{}}'
  Send { message: String },
  /// Replay queued actions
  Sync {
    /// Sync tag (default: sync.default_tag)
    #[arg(long)]
    tag: Option<String>,
  },
  /// List queued items
  Queue,
  /// Present a notification from a push payload (read from stdin if omitted)
  Push { payload: Option<String> },
  /// Activate a notification routed to URL (default: /)
  Click { url: Option<String> },
  /// Replay on a timer and whenever connectivity returns, until Ctrl-C
  Watch,
}

/// Notifications and new views end up on the terminal.
struct ConsoleHost;

impl Host for ConsoleHost {
  fn show_notification(&self, notification: &Notification) -> Result<()> {
    match &notification.options.body {
      Some(body) => println!("[notification] {}: {}", notification.title, body),
      None => println!("[notification] {}", notification.title),
    }
    Ok(())
  }

  fn open_view(&self, url: &Url) -> Result<()> {
    println!("[open] {}", url);
    Ok(())
  }
}

fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "offsync.log"));
  let filter = EnvFilter::try_from_env("OFFSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(
      fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(filter),
    )
    .with(
      fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::WARN),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

fn print_message(message: &Outbound) -> Result<()> {
  let line = serde_json::to_string(message).map_err(|e| eyre!("Failed to encode message: {}", e))?;
  println!("{}", line);
  Ok(())
}

fn print_pending(view: &mut SubscriberHandle) -> Result<()> {
  for message in view.drain() {
    print_message(&message)?;
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let database = config.database_path()?;
  let log_dir = database
    .parent()
    .map(Path::to_path_buf)
    .unwrap_or_else(|| PathBuf::from("."));
  let _guard = init_logging(&log_dir)?;

  let network = Arc::new(HttpClient::new(config.sync.request_timeout())?);
  let origin = config.origin()?;
  let (tick_rate, probe, probe_interval) = (
    config.sync.interval(),
    config.probe_url(),
    config.sync.probe_interval(),
  );

  let worker = OfflineWorker::open(config, Arc::clone(&network), Arc::new(ConsoleHost))?;
  let mut view = worker.broadcaster().subscribe("/");

  match args.command {
    Command::Install => {
      let report = worker.on_install().await?;
      println!(
        "Installed {}/{}: {} stored, {} failed",
        report.namespace,
        report.tag,
        report.stored,
        report.failed.len()
      );
      for (url, reason) in &report.failed {
        println!("  {} ({})", url, reason);
      }
    }
    Command::Activate => worker.on_activate()?,
    Command::Get { url, accept } => {
      let url = origin
        .join(&url)
        .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let mut request = Request::get(url);
      if let Some(accept) = accept {
        request = request.with_header("accept", accept);
      }

      let served = worker.on_intercept(&request).await;
      eprintln!(
        "{} ({})",
        served.response.status,
        served.source.as_str()
      );
      std::io::stdout()
        .write_all(&served.response.body)
        .map_err(|e| eyre!("Failed to write response: {}", e))?;

      // Let a background revalidation land before the process exits.
      if let Some(revalidation) = served.revalidation {
        revalidation
          .await
          .map_err(|e| eyre!("Revalidation task failed: {}", e))?;
      }
    }
    Command::Send { message } => {
      let message: Inbound =
        serde_json::from_str(&message).map_err(|e| eyre!("Invalid message: {}", e))?;
      worker.on_message(message).await?;
    }
    Command::Sync { tag } => {
      let tag = tag.unwrap_or_else(|| worker.sync().default_tag().to_string());
      if worker.on_sync_trigger(&tag).await?.is_none() {
        println!("Nothing registered for tag '{}'", tag);
      }
    }
    Command::Queue => {
      for item in worker.queue().list_all()? {
        let line =
          serde_json::to_string(&item).map_err(|e| eyre!("Failed to encode item: {}", e))?;
        println!("{}", line);
      }
    }
    Command::Push { payload } => {
      let payload = match payload {
        Some(payload) => payload.into_bytes(),
        None => {
          let mut buffer = Vec::new();
          std::io::stdin()
            .read_to_end(&mut buffer)
            .map_err(|e| eyre!("Failed to read payload: {}", e))?;
          buffer
        }
      };
      worker.on_push_payload(&payload)?;
    }
    Command::Click { url } => {
      let notification = Notification {
        title: String::new(),
        options: NotificationOptions {
          data: json!({ "url": url.unwrap_or_else(|| "/".to_string()) }),
          ..NotificationOptions::default()
        },
      };
      match worker.on_notification_activate(&notification)? {
        Activation::Focused(id) => println!("Focused view {}", id),
        Activation::Opened(url) => println!("Opened {}", url),
      }
    }
    Command::Watch => {
      let view_id = view.id();
      let printer = tokio::spawn(async move {
        while let Some(message) = view.recv().await {
          if let Err(e) = print_message(&message) {
            tracing::warn!("{}", e);
          }
        }
      });

      let mut events = EventHandler::new(network, tick_rate, probe, probe_interval);
      info!("Watching; sync every {:?}", tick_rate);
      while let Some(event) = events.next().await {
        match event {
          Event::Tick | Event::Online => worker.flush_default().await,
          Event::Offline => info!("Offline, replays wait for connectivity"),
          Event::Shutdown => break,
        }
      }

      info!("Shutting down");
      // Detaching closes the channel, which ends the printer once it has
      // written what was already delivered.
      worker.broadcaster().unsubscribe(view_id);
      printer
        .await
        .map_err(|e| eyre!("Broadcast printer failed: {}", e))?;
      return Ok(());
    }
  }

  print_pending(&mut view)?;
  Ok(())
}
