use clap::{Parser, Subcommand};
use rothko_core::{Disk, DiskConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rothko-core", version = "0.1.0", about = "Time-distribution metric store engine CLI")]
struct Cli {
    /// Root directory holding one subdirectory per metric
    #[arg(short, long, default_value = "./data")]
    root: PathBuf,
    #[arg(long, default_value = "1024")]
    block_size: usize,
    #[arg(long, default_value = "10")]
    num_blocks: u32,
    #[arg(long, default_value = "10")]
    files_per_metric: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append one raw record to a metric
    Write {
        metric: String,
        start: i64,
        end: i64,
        /// Raw payload bytes, read from this file (use `-` for stdin)
        #[arg(short, long)]
        payload: PathBuf,
    },
    /// Walk a metric backward from `end_hint`, printing each record
    Query {
        metric: String,
        end_hint: i64,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Print the most recent record in a metric
    ReadLast {
        metric: String,
    },
    /// List known metric names, after a directory scan
    Metrics,
    /// Show configuration and on-disk summary for the engine root
    Info,
    /// Force recovery of a metric by reopening it (repairs torn block 0s)
    Recover {
        metric: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = DiskConfig {
        root_dir: cli.root.clone(),
        block_size: cli.block_size,
        num_blocks: cli.num_blocks,
        files_per_metric: cli.files_per_metric,
        handle_cache_size: 64,
        buffer_cache_size: 64,
    };
    config.validate()?;
    let disk = Disk::open(config)?;

    match cli.command {
        Commands::Write {
            metric,
            start,
            end,
            payload,
        } => {
            let bytes = if payload == PathBuf::from("-") {
                use std::io::Read;
                let mut buf = Vec::new();
                std::io::stdin().read_to_end(&mut buf)?;
                buf
            } else {
                std::fs::read(&payload)?
            };
            let written = disk.queue(&metric, start, end, &bytes)?;
            if written {
                println!("wrote {} bytes to {} [{start}, {end})", bytes.len(), metric);
            } else {
                println!("rejected: start {start} is older than the metric's last end");
            }
        }

        Commands::Query {
            metric,
            end_hint,
            limit,
        } => {
            let mut count = 0usize;
            disk.query(&metric, end_hint, |start, end, data| {
                println!("[{start:>12}, {end:>12})  {} B  {}", data.len(), hex::encode(&data[..data.len().min(16)]));
                count += 1;
                Ok(count < limit)
            })?;
            println!("{count} record(s) shown");
        }

        Commands::ReadLast { metric } => {
            let (start, end, data) = disk.read_last(&metric)?;
            println!("[{start}, {end})  {} B  {}", data.len(), hex::encode(&data[..data.len().min(32)]));
        }

        Commands::Metrics => {
            disk.populate_metrics()?;
            let mut names = Vec::new();
            disk.metrics(|name| {
                names.push(name.to_owned());
                Ok(true)
            })?;
            names.sort();
            for name in &names {
                println!("{name}");
            }
            println!("{} metric(s)", names.len());
        }

        Commands::Info => {
            println!("── rothko-core engine ───────────────────────────────────");
            println!("  root             {}", cli.root.display());
            println!("  block_size       {} B", cli.block_size);
            println!("  num_blocks       {}", cli.num_blocks);
            println!("  files_per_metric {}", cli.files_per_metric);
            println!(
                "  per-file capacity {} B",
                cli.block_size as u64 * cli.num_blocks as u64
            );
        }

        Commands::Recover { metric } => {
            // Metric::open repairs any file whose block 0 is torn as part
            // of its constructor; populate_metrics resolves (and so
            // recovers) every metric directory under root.
            disk.populate_metrics()?;
            let (start, end, _) = disk.read_last(&metric)?;
            println!("recovered {metric}: last record [{start}, {end})");
        }
    }

    disk.close();
    Ok(())
}
