//! dbwatch - database row-count monitor.
//!
//! Reads connection settings from DB_* environment variables, then polls the
//! database every few seconds and prints connectivity and per-table row
//! counts until interrupted.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use dbwatch::backend::{MySqlConnector, PgConnector, Timeouts};
use dbwatch::config::{DbConfig, DbKind};
use dbwatch::monitor::{Connector, default_tables, validate_table_name};
use dbwatch::render::{JsonRenderer, Render, TextRenderer};
use dbwatch::runner::{Monitor, RunSummary};

/// Database table row-count monitor.
#[derive(Parser)]
#[command(name = "dbwatch", about = "Database table row-count monitor", version)]
struct Args {
    /// Poll interval in seconds.
    #[arg(short, long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Connection timeout in seconds.
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    connect_timeout: u64,

    /// Per-query timeout in seconds.
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    query_timeout: u64,

    /// Table to monitor. Repeat to monitor several; replaces the default list
    /// (Users, Posts, Comments, Likes, Friendships, Notifications, Bookmarks).
    #[arg(long = "table", value_name = "NAME", value_parser = parse_table)]
    tables: Vec<String>,

    /// Print one JSON object per poll instead of a table.
    #[arg(long)]
    json: bool,

    /// Poll once and exit.
    #[arg(long)]
    once: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn parse_table(s: &str) -> Result<String, String> {
    validate_table_name(s).map(|()| s.to_string())
}

/// Initializes the tracing subscriber on stderr so stdout only carries snapshots.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("dbwatch={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let config = match DbConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            eprint!("{}", config_hint(io::stderr().is_terminal()));
            return ExitCode::from(2);
        }
    };

    let tables = if args.tables.is_empty() {
        default_tables()
    } else {
        args.tables.clone()
    };
    let timeouts = Timeouts {
        connect: Duration::from_secs(args.connect_timeout),
        query: Duration::from_secs(args.query_timeout),
    };

    info!("dbwatch {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Target: {} {} (database '{}'), interval={}s, tables={}",
        config.kind.name(),
        config.target(),
        config.database,
        args.interval,
        tables.join(",")
    );
    if !args.once {
        info!("Press Ctrl+C to stop");
    }

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let result = match config.kind {
        DbKind::MySql => MySqlConnector::new(&config, timeouts)
            .map(|connector| run_with_output(connector, &args, tables, running)),
        DbKind::Postgres => PgConnector::new(&config, timeouts)
            .map(|connector| run_with_output(connector, &args, tables, running)),
    };

    match result {
        Ok(Ok(summary)) => {
            info!(
                "Monitor stopped after {} polls ({} healthy, {} failed)",
                summary.ticks, summary.healthy, summary.failed
            );
            ExitCode::SUCCESS
        }
        Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
            info!("Output closed, stopping");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!("Failed to write output: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Failed to set up {} backend: {}", config.kind.name(), e);
            ExitCode::FAILURE
        }
    }
}

/// Picks the renderer for stdout and runs the loop.
fn run_with_output<C: Connector>(
    connector: C,
    args: &Args,
    tables: Vec<String>,
    running: Arc<AtomicBool>,
) -> io::Result<RunSummary> {
    let stdout = io::stdout();
    if args.json {
        run_monitor(connector, JsonRenderer::new(stdout.lock()), args, tables, running)
    } else {
        let color = stdout.is_terminal();
        run_monitor(
            connector,
            TextRenderer::new(stdout.lock(), color),
            args,
            tables,
            running,
        )
    }
}

fn run_monitor<C: Connector, R: Render>(
    connector: C,
    renderer: R,
    args: &Args,
    tables: Vec<String>,
    running: Arc<AtomicBool>,
) -> io::Result<RunSummary> {
    let mut monitor = Monitor::new(connector, renderer, tables)
        .with_interval(Duration::from_secs(args.interval))
        .with_running_flag(running);
    if args.once {
        monitor = monitor.with_max_ticks(1);
    }
    monitor.run()
}

/// Environment variables expected by the connector, colored when `color`.
fn config_hint(color: bool) -> String {
    let (yellow, reset) = if color {
        ("\x1b[33m", "\x1b[0m")
    } else {
        ("", "")
    };
    format!(
        "{yellow}  Configure the connection with environment variables:
    export DB_HOST=127.0.0.1
    export DB_PORT=4000          # default 4000
    export DB_USER=root
    export DB_PASSWORD=secret
    export DB_NAME=app
    export DB_KIND=mysql         # or postgres
    export DB_SSL_MODE=preferred # disabled, required, verify_identity{reset}\n"
    )
}
