//! Planlog CLI - Command-line tools for execution logs

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use planlog_core::client::StreamConnection;
use planlog_core::config::PlanlogConfig;
use planlog_core::listener::CycleListener;
use planlog_core::log::{CycleStats, LogFile, LogOptions, LogPaths, Record};
use planlog_core::replay::{LogReplay, Replay};
use planlog_core::server::TailingServer;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "planlog")]
#[command(about = "Inspect, serve and replay plan execution logs", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to planlog.toml and PLANLOG_* variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a growing log to TCP clients
    Serve {
        /// Log basename
        basename: Option<PathBuf>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Polling period of the event file, in milliseconds
        #[arg(long)]
        sampling_period_ms: Option<u64>,
    },
    /// Show the header and cycle range of a log
    Info {
        /// Log basename
        basename: Option<PathBuf>,
    },
    /// Regenerate the index file from the event file
    RebuildIndex {
        /// Log basename
        basename: Option<PathBuf>,
    },
    /// Print records, one per line
    Dump {
        /// Log basename
        basename: Option<PathBuf>,
        /// First cycle to print
        #[arg(long, default_value_t = 0)]
        from: usize,
        /// Number of cycles to print (all by default)
        #[arg(long)]
        count: Option<usize>,
    },
    /// Rebuild the plan up to a cycle
    Replay {
        /// Log basename
        basename: Option<PathBuf>,
        /// Cycle to stop after (the last one by default)
        #[arg(long, conflicts_with = "at")]
        cycle: Option<u64>,
        /// Stop after the last cycle started at this time (seconds)
        #[arg(long)]
        at: Option<f64>,
    },
    /// Follow a log server and print one line per cycle
    Watch {
        /// Server address
        #[arg(default_value = "127.0.0.1:20200")]
        addr: String,
    },
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PlanlogConfig::from_file(path)?,
        None => PlanlogConfig::load()?,
    };

    match cli.command {
        Commands::Version => {
            println!("planlog {}", env!("CARGO_PKG_VERSION"));
            println!("planlog-core {}", planlog_core::VERSION);
        }
        Commands::Serve {
            basename,
            port,
            sampling_period_ms,
        } => {
            let basename = basename.unwrap_or_else(|| config.log.basename.clone());
            let mut server_config = config.server.clone();
            if let Some(port) = port {
                server_config.port = port;
            }
            if let Some(ms) = sampling_period_ms {
                if ms == 0 {
                    bail!("sampling period must be positive");
                }
                server_config.sampling_period = Duration::from_millis(ms);
            }
            serve(&basename, server_config).await?;
        }
        Commands::Info { basename } => {
            let basename = basename.unwrap_or_else(|| config.log.basename.clone());
            info(&open_log(&basename, &config)?);
        }
        Commands::RebuildIndex { basename } => {
            let basename = basename.unwrap_or_else(|| config.log.basename.clone());
            let mut log = open_log(&basename, &config)?;
            let cycles = log.rebuild_index()?;
            println!(
                "Rebuilt {} ({} cycles)",
                log.paths().index.display(),
                cycles
            );
        }
        Commands::Dump {
            basename,
            from,
            count,
        } => {
            let basename = basename.unwrap_or_else(|| config.log.basename.clone());
            dump(&mut open_log(&basename, &config)?, from, count)?;
        }
        Commands::Replay {
            basename,
            cycle,
            at,
        } => {
            let basename = basename.unwrap_or_else(|| config.log.basename.clone());
            let log = open_log(&basename, &config)?;
            let cycle = match at {
                Some(time) => Some(
                    log.index()
                        .cycle_at_time(time)
                        .with_context(|| format!("No cycle started at or before {}", time))?
                        as u64,
                ),
                None => cycle,
            };
            let mut replay = LogReplay::new(log, Replay::with_config(&config.replay))?;
            replay_to(&mut replay, cycle)?;
        }
        Commands::Watch { addr } => {
            let mut connection = StreamConnection::connect(addr.as_str(), Printer::default())
                .await
                .with_context(|| format!("Failed to watch {}", addr))?;
            let cycles = connection.run().await?;
            println!("Connection closed after {} cycles", cycles);
        }
    }

    Ok(())
}

fn open_log(basename: &Path, config: &PlanlogConfig) -> Result<LogFile> {
    LogFile::open_with(basename, config.log.index_sample_count)
        .with_context(|| format!("Failed to open log {}", basename.display()))
}

async fn serve(basename: &Path, config: planlog_core::config::ServerConfig) -> Result<()> {
    let events = LogPaths::new(basename).events;
    let server = TailingServer::bind(events, config).await?;
    let handle = server.handle();
    println!(
        "Serving {} on {}",
        server.events_path().display(),
        server.local_addr()
    );

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
        }
        handle.shutdown();
    });

    server.run().await?;
    Ok(())
}

fn info(log: &LogFile) {
    println!("Events: {}", log.paths().events.display());
    println!("Index:  {}", log.paths().index.display());
    for (key, value) in log.options() {
        println!("Option {}: {}", key, value);
    }
    println!("Cycles: {}", log.cycle_count());
    if let Some((start, end)) = log.index().time_span() {
        println!("Span:   {:.3} .. {:.3} ({:.3}s)", start, end, end - start);
    }
}

fn dump(log: &mut LogFile, from: usize, count: Option<usize>) -> Result<()> {
    let available = log.cycle_count();
    if from > available {
        bail!("cycle {} out of range, log has {} cycles", from, available);
    }
    log.seek_cycle(from)?;

    let count = count.unwrap_or(usize::MAX);
    for (cycle, records) in (from..).zip(log.cycles()).take(count) {
        for record in records? {
            println!("{}", format_record(cycle, &record));
        }
    }
    Ok(())
}

fn format_record(cycle: usize, record: &Record) -> String {
    let args = serde_json::to_string(&record.args).unwrap_or_default();
    format!(
        "{:>6} {}.{:06} {} {}",
        cycle, record.sec, record.usec, record.method, args
    )
}

fn replay_to(replay: &mut LogReplay, cycle: Option<u64>) -> Result<()> {
    match cycle {
        Some(cycle) => replay.seek(cycle)?,
        None => {
            replay.run_to_end()?;
        }
    }

    let replay = replay.replay();
    let state = replay.rebuilder().state();
    match replay.next_cycle() {
        0 => println!("No cycles"),
        next => println!("State after cycle {}", next - 1),
    }
    println!("Tasks:     {}", state.known_tasks.len());
    println!("Events:    {}", state.free_events.len());
    println!("Missions:  {}", state.missions.len());
    println!("Relations: {}", state.relations.len());
    println!("Proxies:   {}", replay.rebuilder().manager().len());
    println!("Snapshots: {}", replay.history().len());
    Ok(())
}

/// Prints one line per received cycle
#[derive(Default)]
struct Printer {
    cycles: u64,
}

impl CycleListener for Printer {
    fn options(&mut self, options: &LogOptions) {
        println!("Log options: {}", serde_json::Value::from_iter(options.clone()));
    }

    fn cycle(&mut self, stats: &CycleStats, records: &[Record]) {
        println!(
            "{:>6} {:.3} {:>4} records {:.1}ms",
            self.cycles,
            stats.start,
            records.len(),
            stats.duration() * 1000.0
        );
        self.cycles += 1;
    }
}
