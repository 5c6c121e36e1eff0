use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tapestry_cache::app::App;
use tapestry_cache::config::Config;
use tapestry_cache::logging;
use tapestry_cache::refresh::{ProgressEvent, RefreshOutcome};

#[derive(Parser, Debug)]
#[command(name = "tapestry")]
#[command(about = "Offline content cache with daily versioned refresh")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tapestry/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Refresh the content manifest if the last refresh was before today
  Refresh {
    /// Refresh even if already current
    #[arg(short, long)]
    force: bool,
  },
  /// Print a cached entry, looking through every storage tier
  Get { key: String },
  /// Clear cached content
  Clear {
    /// Only drop content; keep version tags and media caches
    #[arg(long)]
    json_only: bool,
  },
  /// List diagnostic log entries
  Logs {
    /// Delete these entry ids instead of listing
    #[arg(long, num_args = 1..)]
    delete: Vec<i64>,
  },
  /// Pre-cache audio up to the last refresh day, plus extra assets
  Audio,
  /// Fetch a URL through the agent's caching policy
  Fetch { url: String },
  /// Show cache freshness
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init_tracing(&config.log_dir())?;

  let mut app = App::new(config)?;

  match args.command {
    Command::Refresh { force } => {
      let mut progress = app.progress().subscribe();
      let printer = tokio::spawn(async move {
        while let Ok(event) = progress.recv().await {
          match event {
            ProgressEvent::Progress { percent } => eprintln!("Refreshing... {}%", percent),
            ProgressEvent::Complete => break,
          }
        }
      });

      match app.refresh(force).await? {
        RefreshOutcome::Refreshed(report) => {
          let _ = printer.await;
          println!(
            "Updated: {}  Unchanged: {}  Failed: {}",
            report.updated.len(),
            report.unchanged.len(),
            report.failed.len()
          );
          for file in &report.failed {
            println!("  failed: {}", file);
          }
        }
        RefreshOutcome::AlreadyCurrent => {
          printer.abort();
          println!("Cache is up to date for today");
        }
        RefreshOutcome::AlreadyRunning => {
          printer.abort();
          println!("A refresh is already running");
        }
      }
    }
    Command::Get { key } => match app.get(&key)? {
      Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
      None => {
        eprintln!("No data for {}", key);
        std::process::exit(1);
      }
    },
    Command::Clear { json_only } => {
      app.clear(json_only).await?;
      println!("Cache cleared");
    }
    Command::Logs { delete } => {
      if delete.is_empty() {
        for entry in app.logs()? {
          println!("{}", serde_json::to_string(&entry)?);
        }
      } else {
        app.delete_logs(&delete)?;
        println!("Deleted {} log entries", delete.len());
      }
    }
    Command::Audio => {
      let (audio, assets) = app.warm_media().await?;
      println!("Requested {} audio files, cached {} extra assets", audio, assets);
    }
    Command::Fetch { url } => {
      let intercepted = app.fetch(&url).await?;
      println!(
        "{} {:?} ({} bytes)",
        intercepted.response.status,
        intercepted.source,
        intercepted.response.body.len()
      );
    }
    Command::Status => {
      let status = app.status()?;
      match status.last_refresh {
        Some(date) => println!("Last refresh: {}", date.to_rfc3339()),
        None => println!("Last refresh: never"),
      }
      for (file, version) in &status.versions {
        println!("  {:<20} {}", file, version.as_deref().unwrap_or("-"));
      }
      println!("Agent caches: {}", status.agent_caches.join(", "));
      println!("Log entries: {}", status.log_entries);
      println!(
        "Language: {}  Poem set: {}",
        status.state.language, status.state.poem_set
      );
    }
  }

  Ok(())
}
