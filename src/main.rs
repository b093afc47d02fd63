//! rfstore CLI
//!
//! Inspects ring-buffer channel storage:
//! - list channels and their bounds
//! - show continuous blocks of a channel
//! - show channel attributes
//! - show a channel metadata file
//! - generate a default config file

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rfstore::config::{generate_default_config, Config, LoggingConfig};
use rfstore::index::{CatalogIndex, ChannelMetadata, ContinuousBlock, IndexError, StorageRoot};
use rfstore::storage::layout;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rfstore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect ring-buffer RF channel storage")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Storage root (repeatable); replaces the configured roots
    #[arg(short, long = "root", global = true)]
    pub roots: Vec<String>,

    /// Config file (default: standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List channels with their bounds
    Channels,

    /// Show the sample bounds of a channel
    Bounds {
        /// Channel name
        channel: String,
    },

    /// Show continuous blocks of a channel
    Blocks {
        /// Channel name
        channel: String,
        /// First sample (default: channel start)
        #[arg(long)]
        start: Option<u64>,
        /// Last sample, inclusive (default: channel end)
        #[arg(long)]
        stop: Option<u64>,
    },

    /// Show channel attributes
    Metadata {
        /// Channel name
        channel: String,
    },

    /// Show the channel metadata file in effect
    MetadataFile {
        /// Channel name
        channel: String,
        /// Unix seconds (default: newest file)
        #[arg(long)]
        at: Option<i64>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct BoundsRow {
    channel: String,
    start: Option<u64>,
    end: Option<u64>,
    start_time: Option<String>,
    end_time: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing config to {:?}", path))?;
                println!("Wrote default config to {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging)?;

    let roots: Vec<StorageRoot> = if cli.roots.is_empty() {
        config.reader.storage_roots()?
    } else {
        cli.roots.iter().map(|r| StorageRoot::parse(r)).collect()
    };
    let options = config.reader.index_options()?;
    tracing::debug!("Opening catalog over {} root(s)", roots.len());
    let mut catalog = CatalogIndex::open_with_options(roots, options)?;

    let json = match cli.format.as_str() {
        "json" => true,
        "table" => false,
        other => bail!("Unknown output format: {}", other),
    };

    match cli.command {
        Commands::Channels => {
            let rows: Vec<BoundsRow> = catalog
                .get_channels()
                .iter()
                .map(|name| bounds_row(&catalog, name))
                .collect::<Result<_, _>>()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No channels found.");
            } else {
                print_bounds(&rows);
            }
        }

        Commands::Bounds { channel } => {
            let row = bounds_row(&catalog, &channel)?;
            if row.start.is_none() {
                bail!(IndexError::NoData(channel));
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&row)?);
            } else {
                print_bounds(std::slice::from_ref(&row));
            }
        }

        Commands::Blocks {
            channel,
            start,
            stop,
        } => {
            let (first, end) = catalog.get_bounds(&channel)?;
            let start = start.unwrap_or(first);
            let stop = stop.unwrap_or(end - 1);
            let blocks = catalog.get_continuous_blocks(start, stop, &channel)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&blocks)?);
            } else {
                print_blocks(&blocks);
            }
        }

        Commands::Metadata { channel } => {
            let metadata = catalog.get_channel_metadata(&channel)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            } else {
                print_metadata(&channel, &metadata);
            }
        }

        Commands::MetadataFile { channel, at } => {
            let file = catalog.get_metadata(&channel, at)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&file)?);
            } else {
                println!("File:      {:?}", file.path);
                println!("Timestamp: {}", file.timestamp);
                println!("{}", serde_json::to_string_pretty(&file.values)?);
            }
        }

        Commands::Config { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("rfstore={}", logging.level)));

    let writer = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init(),
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .init(),
        other => bail!("Unknown log format: {}", other),
    }
    Ok(())
}

fn bounds_row(catalog: &CatalogIndex, channel: &str) -> anyhow::Result<BoundsRow> {
    let bounds = match catalog.get_bounds(channel) {
        Ok(bounds) => Some(bounds),
        Err(IndexError::NoData(_)) => None,
        Err(e) => return Err(e.into()),
    };
    let rate = catalog.get_channel_metadata(channel).ok().map(|m| m.sample_rate);
    let time = |sample: u64| rate.map(|rate| format_sample_time(sample, rate));
    Ok(BoundsRow {
        channel: channel.to_string(),
        start: bounds.map(|(start, _)| start),
        end: bounds.map(|(_, end)| end),
        start_time: bounds.and_then(|(start, _)| time(start)),
        end_time: bounds.and_then(|(_, end)| time(end)),
    })
}

fn format_sample_time(sample: u64, sample_rate: f64) -> String {
    let (secs, millis) = layout::sample_to_unix(sample, sample_rate);
    chrono::DateTime::from_timestamp(secs, millis * 1_000_000)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_bounds(rows: &[BoundsRow]) {
    println!(
        "{:<20} {:>16} {:>16} {:>12}  {}",
        "Channel", "Start", "End", "Samples", "Time span"
    );
    println!("{}", "-".repeat(100));
    for row in rows {
        let dash = || "-".to_string();
        let samples = row.start.zip(row.end).map(|(s, e)| (e - s).to_string());
        println!(
            "{:<20} {:>16} {:>16} {:>12}  {} .. {}",
            row.channel,
            row.start.map(|s| s.to_string()).unwrap_or_else(dash),
            row.end.map(|e| e.to_string()).unwrap_or_else(dash),
            samples.unwrap_or_else(dash),
            row.start_time.clone().unwrap_or_else(dash),
            row.end_time.clone().unwrap_or_else(dash),
        );
    }
}

fn print_blocks(blocks: &[ContinuousBlock]) {
    if blocks.is_empty() {
        println!("No data in range.");
        return;
    }
    println!("{:>16} {:>16} {:>12}", "Start", "End", "Extent");
    println!("{}", "-".repeat(46));
    for block in blocks {
        println!("{:>16} {:>16} {:>12}", block.start, block.end(), block.extent);
    }
    let total: u64 = blocks.iter().map(|b| b.extent).sum();
    println!();
    println!("{} block(s), {} samples", blocks.len(), total);
}

fn print_metadata(channel: &str, metadata: &ChannelMetadata) {
    println!("Channel:                {}", channel);
    println!("UUID:                   {}", metadata.uuid);
    println!("Sample rate:            {} Hz", metadata.sample_rate);
    println!("Format:                 {}", metadata.format);
    println!("Samples per file:       {}", metadata.samples_per_file);
    println!("Files per subdirectory: {}", metadata.files_per_subdirectory);
}
