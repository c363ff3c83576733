// src/main.rs
//! Sessionwire relay
//!
//! `sessionwire [run] [config]` streams NDJSON records from stdin into a
//! capture session until EOF or Ctrl-C. `sessionwire segments <file>
//! [--ndjson]` reconstructs a stored recording and prints its timeline.

use anyhow::{bail, Context, Result};
use sessionwire::ingest::lifecycle::LifecycleSignal;
use sessionwire::observability::init_tracing;
use sessionwire::recording::{LogEntry, RecordedEvent};
use sessionwire::replay::{ExportFormat, Exporter, Timeline};
use sessionwire::session::Session;
use sessionwire::utils::config::SdkConfig;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => run(None).await,
        Some("run") => run(args.get(1).map(Path::new)).await,
        Some("segments") => {
            let path = args
                .get(1)
                .context("usage: sessionwire segments <file> [--ndjson]")?;
            let format = if args.iter().any(|a| a == "--ndjson") {
                ExportFormat::Ndjson
            } else {
                ExportFormat::Json
            };
            segments(Path::new(path), format)
        }
        Some("--version") => {
            println!("sessionwire {}", sessionwire::VERSION);
            Ok(())
        }
        Some(other) => bail!("unknown command: {}", other),
    }
}

async fn run(config_path: Option<&Path>) -> Result<()> {
    info!("Starting sessionwire relay v{}", sessionwire::VERSION);

    let config = SdkConfig::load_from(config_path).context("Failed to load configuration")?;
    let session = Session::start(config)?;
    info!("Recording session {}", session.id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut records = 0usize;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, flushing...");
                session.lifecycle().emit(LifecycleSignal::Teardown);
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    records += 1;
                    if let Ok(event) = serde_json::from_str::<RecordedEvent>(&line) {
                        session.buffer().push_event(event);
                    } else if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
                        session.buffer().push_log(entry);
                    } else {
                        warn!("Skipping unrecognised record on line {}", records);
                    }
                }
                None => break,
            },
        }
    }

    session.stop().await;

    let stats = session.stats();
    info!(
        "Relayed {} records ({} flushes delivered, {} failed, {} batches dropped)",
        records, stats.flushes_delivered, stats.flushes_failed, stats.batches_dropped
    );
    if stats.logs.evict_count > 0 {
        info!(
            "Evicted {} log entries ({:.1}% of pushed)",
            stats.logs.evict_count,
            stats.logs.eviction_rate()
        );
    }
    Ok(())
}

fn segments(path: &Path, format: ExportFormat) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let timeline = Timeline::from_json_str(&text)?;

    let mut stdout = std::io::stdout().lock();
    Exporter::new(format).write_to(&timeline, &mut stdout)?;
    Ok(())
}
