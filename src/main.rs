use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use feedvoice::config::Config;
use feedvoice::content::SpeechCleaner;
use feedvoice::events::PipelineEvent;
use feedvoice::feed::{http_client, HttpFetcher, OpmlDirectory, StaticCredential};
use feedvoice::pipeline::Pipeline;
use feedvoice::storage::{EntryStatus, FeedStatus, SqliteReadState};
use feedvoice::util::{strip_control_chars, truncate_to_width};

/// Entry titles in the summary are cut to this many columns.
const TITLE_WIDTH: usize = 72;

#[derive(Parser, Debug)]
#[command(
    name = "feedvoice",
    about = "Fetch subscribed feeds and turn their entries into speech-ready text"
)]
struct Args {
    /// Config file (default: ~/.config/feedvoice/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// OPML subscription file (overrides `opml_path` from the config)
    #[arg(long, value_name = "FILE")]
    opml: Option<PathBuf>,

    /// Emit every update and the final summary as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Print the cleaned text of every entry in the summary
    #[arg(long)]
    show_text: bool,

    /// Retry every failed feed once after the first pass
    #[arg(long)]
    retry_failed: bool,
}

/// Get the config directory path (~/.config/feedvoice/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedvoice"))
}

/// Creates the config directory with user-only permissions.
fn ensure_config_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).context("Failed to create config directory")?;
    }

    // SEC-007: user-only access on Unix; the read-state database lives here
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(path = %dir.display(), error = %e, "Failed to set config directory permissions to 0700");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries results (and JSON lines), logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    ensure_config_dir(&config_dir)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let opml_path = args
        .opml
        .clone()
        .or_else(|| config.opml_path.clone())
        .unwrap_or_else(|| config_dir.join("feeds.opml"));
    if !opml_path.exists() {
        anyhow::bail!(
            "No feeds file found at {}. Pass --opml FILE or set opml_path in {}",
            opml_path.display(),
            config_path.display()
        );
    }

    let pipeline = build_pipeline(&config, &opml_path).await?;
    let mut updates = pipeline.subscribe();

    let feeds = pipeline
        .initialize_feeds()
        .await
        .context("Failed to load feeds")?;
    if feeds.is_empty() {
        eprintln!("Warning: No valid feeds found in {}", opml_path.display());
    } else if !args.json {
        eprintln!("Processing {} feeds from {}", feeds.len(), opml_path.display());
    }

    let mut printer = UpdatePrinter::new(args.json);
    let run = async {
        pipeline.wait().await;
        if args.retry_failed {
            retry_failed(&pipeline).await;
        }
    };
    tokio::pin!(run);

    loop {
        tokio::select! {
            _ = &mut run => break,
            Some(event) = updates.recv() => printer.print(&event)?,
        }
    }
    drain(&mut updates, &mut printer)?;

    if args.json {
        println!("{}", serde_json::to_string(&pipeline.summary())?);
    } else {
        print_summary(&pipeline, args.show_text).await;
    }
    Ok(())
}

async fn build_pipeline(config: &Config, opml_path: &Path) -> Result<Pipeline> {
    let client = http_client(config.pipeline_config().fetch_timeout)
        .context("Failed to build HTTP client")?;
    let mut fetcher = HttpFetcher::new(client).with_max_size(config.max_document_bytes);
    if let Some(token) = config.api_token() {
        fetcher = fetcher.with_credentials(Arc::new(StaticCredential::from(token)));
    }

    let mut builder = Pipeline::builder(
        Arc::new(OpmlDirectory::new(opml_path)),
        Arc::new(fetcher),
        Arc::new(SpeechCleaner::new(config.cleaner_config())),
    )
    .config(config.pipeline_config());

    if let Some(db_path) = &config.read_state_db {
        let db_path_str = db_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in read-state database path"))?;
        let read_state = SqliteReadState::open(db_path_str)
            .await
            .with_context(|| format!("Failed to open read-state database {}", db_path.display()))?;
        builder = builder.read_state(Arc::new(read_state));
    }

    Ok(builder.build())
}

/// Retries every feed that ended in `Error`, concurrently. The pipeline
/// caps how many retries actually run at once.
async fn retry_failed(pipeline: &Pipeline) {
    let failed: Vec<String> = pipeline
        .feed_states()
        .into_iter()
        .filter(|s| s.status == FeedStatus::Error)
        .map(|s| s.feed_id)
        .collect();
    if failed.is_empty() {
        return;
    }

    tracing::info!(feeds = failed.len(), "Retrying failed feeds");
    let results = join_all(failed.iter().map(|id| pipeline.retry_feed(id))).await;
    for (id, result) in failed.iter().zip(results) {
        if let Err(e) = result {
            tracing::warn!(feed_id = %id, error = %e, "Retry failed to start");
        }
    }
}

fn drain(updates: &mut mpsc::UnboundedReceiver<PipelineEvent>, printer: &mut UpdatePrinter) -> Result<()> {
    while let Ok(event) = updates.try_recv() {
        printer.print(&event)?;
    }
    Ok(())
}

/// Renders updates as they arrive: JSON lines, or one line per finished
/// feed on stderr.
struct UpdatePrinter {
    json: bool,
    titles: HashMap<String, String>,
}

impl UpdatePrinter {
    fn new(json: bool) -> Self {
        Self {
            json,
            titles: HashMap::new(),
        }
    }

    fn print(&mut self, event: &PipelineEvent) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(event)?);
            return Ok(());
        }

        match event {
            PipelineEvent::FeedsLoaded { feeds } => {
                self.titles = feeds
                    .iter()
                    .map(|f| (f.id.clone(), strip_control_chars(&f.title).into_owned()))
                    .collect();
            }
            PipelineEvent::FeedState { state } if state.status.is_terminal() => {
                let title = self
                    .titles
                    .get(&state.feed_id)
                    .map(String::as_str)
                    .unwrap_or(&state.feed_id);
                match &state.error {
                    Some(error) => eprintln!("  x {title}: {error}"),
                    None => eprintln!("  ok {title}"),
                }
            }
            _ => {}
        }
        Ok(())
    }
}

async fn print_summary(pipeline: &Pipeline, show_text: bool) {
    for feed in pipeline.feeds() {
        let title = strip_control_chars(&feed.title);
        let status = pipeline
            .get_feed_state(&feed.id)
            .map(|s| s.status.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!("{title} [{status}]");

        for entry in pipeline.get_entries_by_feed(&feed.id) {
            let marker = match entry.status {
                EntryStatus::Cleaned => "+",
                EntryStatus::Error => "-",
                EntryStatus::Raw | EntryStatus::Cleaning => "?",
            };
            let consumed = if pipeline.is_consumed(&entry.id).await {
                " (played)"
            } else {
                ""
            };
            let entry_title = strip_control_chars(&entry.title);
            println!(
                "  {marker} {}{consumed}",
                truncate_to_width(&entry_title, TITLE_WIDTH)
            );
            if show_text {
                if let Some(text) = &entry.cleaned_body {
                    for paragraph in text.split("\n\n") {
                        println!("      {paragraph}");
                    }
                }
            }
        }
    }

    let summary = pipeline.summary();
    println!();
    println!(
        "{} feeds: {} ready, {} failed. {} entries: {} cleaned, {} rejected.",
        summary.feeds,
        summary.feeds_ready,
        summary.feeds_failed,
        summary.entries,
        summary.entries_cleaned,
        summary.entries_rejected
    );
}
