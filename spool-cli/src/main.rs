/*!
Spool CLI - inspect and edit spool backing files from the shell.

Records are handled as arbitrary JSON values. Every mutating command recovers
the file, applies one operation and flushes before exiting.
*/

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use spool_core::{
    read_metadata, BindStatus, BufferMetadata, BufferOptions, Collection, Queue, QueueRegistry,
    Stack, StackRegistry, METADATA_SIZE,
};
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "spool")]
#[command(about = "CLI for spool durable buffer files")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the metadata header of a backing file
    Inspect {
        /// Backing file
        file: PathBuf,
    },
    /// Print every retained record, head to tail, one JSON value per line
    Dump {
        /// Backing file
        file: PathBuf,
    },
    /// Append a JSON record at the tail of a queue file
    Enqueue {
        /// Backing file, created if missing
        file: PathBuf,
        /// Record as a JSON value
        record: String,
    },
    /// Remove and print the record at the head of a queue file
    Dequeue {
        /// Backing file
        file: PathBuf,
    },
    /// Push a JSON record onto a stack file
    Push {
        /// Backing file, created if missing
        file: PathBuf,
        /// Record as a JSON value
        record: String,
    },
    /// Remove and print the record on top of a stack file
    Pop {
        /// Backing file
        file: PathBuf,
    },
}

#[derive(Tabled)]
struct HeaderField {
    #[tabled(rename = "Field")]
    name: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Inspect { file } => inspect(&file)?,
        Commands::Dump { file } => dump(&file)?,
        Commands::Enqueue { file, record } => enqueue(&file, &record)?,
        Commands::Dequeue { file } => dequeue(&file)?,
        Commands::Push { file, record } => push(&file, &record)?,
        Commands::Pop { file } => pop(&file)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn inspect(file: &Path) -> Result<(), anyhow::Error> {
    let metadata = read_metadata(file)
        .with_context(|| format!("Failed to read header of {}", file.display()))?;
    let file_size = std::fs::metadata(file)?.len();

    println!("{}", Table::new(header_rows(&metadata, file_size)));
    Ok(())
}

fn header_rows(metadata: &BufferMetadata, file_size: u64) -> Vec<HeaderField> {
    let unreferenced = file_size.saturating_sub(metadata.file_end_offset.max(METADATA_SIZE));
    vec![
        HeaderField {
            name: "ID",
            value: metadata.id.to_string(),
        },
        HeaderField {
            name: "Records",
            value: metadata.length.to_string(),
        },
        HeaderField {
            name: "Created",
            value: format_timestamp(metadata.created_at),
        },
        HeaderField {
            name: "Persistence",
            value: format!(
                "{} (every {:?})",
                on_off(metadata.persistence_enabled),
                metadata.persistence_period
            ),
        },
        HeaderField {
            name: "Recovery",
            value: on_off(metadata.recovery_enabled).to_string(),
        },
        HeaderField {
            name: "Start offset",
            value: metadata.file_start_offset.to_string(),
        },
        HeaderField {
            name: "End offset",
            value: metadata.file_end_offset.to_string(),
        },
        HeaderField {
            name: "Retained",
            value: format_size(metadata.retained_bytes()),
        },
        HeaderField {
            name: "File size",
            value: format_size(file_size),
        },
        HeaderField {
            name: "Unreferenced tail",
            value: format_size(unreferenced),
        },
    ]
}

fn dump(file: &Path) -> Result<(), anyhow::Error> {
    let registry: QueueRegistry<Value> = QueueRegistry::new();
    let binding = registry.bind(
        BufferOptions::in_memory()
            .with_backing_file(file)
            .with_recovery(true),
    )?;
    if let BindStatus::RecoveryFailed { reason } = &binding.status {
        bail!("Failed to recover {}: {reason}", file.display());
    }

    for value in binding.buffer.values() {
        println!("{}", serde_json::to_string(&value)?);
    }
    Ok(())
}

fn parse_record(record: &str) -> Result<Value, anyhow::Error> {
    serde_json::from_str(record).with_context(|| format!("Record is not valid JSON: {record}"))
}

/// Refuse to go on when a file exists but could not be replayed
fn check_recovered(file: &Path, status: &BindStatus) -> Result<(), anyhow::Error> {
    match status {
        BindStatus::RecoveryFailed { reason } if file.exists() => {
            bail!("Refusing to modify {}: {reason}", file.display())
        }
        BindStatus::RecoveryFailed { .. } => {
            info!(path = %file.display(), "creating new backing file");
            Ok(())
        }
        status => {
            debug!(path = %file.display(), status = ?status, "opened backing file");
            Ok(())
        }
    }
}

fn open_queue(registry: &QueueRegistry<Value>, file: &Path) -> Result<Queue<Value>, anyhow::Error> {
    let binding = registry.bind(BufferOptions::durable(file))?;
    check_recovered(file, &binding.status)?;
    Ok(Queue::from_buffer(binding.buffer))
}

fn open_stack(registry: &StackRegistry<Value>, file: &Path) -> Result<Stack<Value>, anyhow::Error> {
    let binding = registry.bind(BufferOptions::durable(file))?;
    check_recovered(file, &binding.status)?;
    Ok(Stack::from_buffer(binding.buffer))
}

fn enqueue(file: &Path, record: &str) -> Result<(), anyhow::Error> {
    let value = parse_record(record)?;
    let registry = QueueRegistry::new();
    let queue = open_queue(&registry, file)?;

    queue.enqueue(value);
    let report = queue.flush()?;
    println!("✓ Enqueued ({} records, {} bytes appended)", queue.len(), report.bytes_appended);
    Ok(())
}

fn dequeue(file: &Path) -> Result<(), anyhow::Error> {
    let registry = QueueRegistry::new();
    let queue = open_queue(&registry, file)?;

    let value = queue.dequeue().context("Queue is empty")?;
    queue.flush()?;
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}

fn push(file: &Path, record: &str) -> Result<(), anyhow::Error> {
    let value = parse_record(record)?;
    let registry = StackRegistry::new();
    let stack = open_stack(&registry, file)?;

    stack.push(value);
    let report = stack.flush()?;
    println!("✓ Pushed ({} records, {} bytes appended)", stack.len(), report.bytes_appended);
    Ok(())
}

fn pop(file: &Path) -> Result<(), anyhow::Error> {
    let registry = StackRegistry::new();
    let stack = open_stack(&registry, file)?;

    let value = stack.pop().context("Stack is empty")?;
    stack.flush()?;
    if stack.is_empty() {
        warn!(path = %file.display(), "stack is now empty");
    }
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    timestamp
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
