//! flowq - network-flow query client.
//!
//! Queries the block database written by the capture agent, locally or
//! fanned out across query servers, and renders the result as a table,
//! CSV, or JSON.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use flowq_core::db::{iface_summary, interfaces};
use flowq_core::engine::LocalRunner;
use flowq_core::print::fmt::{format_bytes, format_count, format_timestamp};
use flowq_core::print::{Printer, use_colors};
use flowq_core::query::{Args as QueryArgs, Format, Statement};
use flowq_core::results::{QueryResult, StatusCode};
use flowq_core::util::parse_duration_secs;

/// Network-flow query client.
#[derive(Parser)]
#[command(
    name = "flowq",
    about = "Query engine for the flow block database",
    version = flowq_core::VERSION,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Attributes to group by, e.g. "sip,dip" or "time,sip,dip".
    query: Option<String>,

    /// Path to the block database.
    #[arg(short = 'd', long, env = "FLOWQ_DB")]
    db_path: Option<PathBuf>,

    /// Comma-separated interface list, "any", or /regex/.
    #[arg(short, long)]
    ifaces: Option<String>,

    /// Filter condition, e.g. "dport = 443 & snet = 10.0.0.0/8".
    #[arg(short, long)]
    condition: Option<String>,

    /// Start of the time range (unix, ISO 8601, or relative like -24h).
    #[arg(short, long)]
    first: Option<String>,

    /// End of the time range. Empty means now, "max" means unbounded.
    #[arg(short, long)]
    last: Option<String>,

    /// Maximum number of result rows.
    #[arg(short = 'n', long = "limit")]
    limit: Option<u64>,

    /// Sort order: bytes, packets, or time.
    #[arg(short, long)]
    sort_by: Option<String>,

    /// Sort ascending instead of descending.
    #[arg(short, long)]
    ascending: bool,

    /// Only account for inbound traffic.
    #[arg(long = "in")]
    in_: bool,

    /// Only account for outbound traffic.
    #[arg(long)]
    out: bool,

    /// Account for the sum of inbound and outbound traffic.
    #[arg(long)]
    sum: bool,

    /// Output format: txt, csv, or json.
    #[arg(short = 'e', long)]
    format: Option<String>,

    /// Resolve top IPs to names via reverse DNS.
    #[arg(long)]
    resolve: bool,

    /// Number of rows to resolve.
    #[arg(long, default_value_t = 25)]
    resolve_rows: usize,

    /// Overall reverse-DNS deadline, e.g. "2s".
    #[arg(long, default_value = "2s")]
    resolve_timeout: String,

    /// Memory ceiling as a percentage of physical memory.
    #[arg(long = "max-mem")]
    max_mem: Option<u32>,

    /// Trade speed for a smaller memory footprint.
    #[arg(long)]
    low_mem: bool,

    /// Query timeout, e.g. "30s". Empty disables the timeout.
    #[arg(long)]
    timeout: Option<String>,

    /// JSON file with baseline query arguments.
    #[arg(long)]
    stored_query: Option<PathBuf>,

    /// JSON configuration file (db_path, query server address, hosts).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address of the query server for distributed queries.
    #[arg(long = "query.server.addr", env = "FLOWQ_SERVER_ADDR")]
    query_server_addr: Option<String>,

    /// Host expression for distributed queries, e.g. "host1:7777,host2:7777".
    #[arg(short = 'q', long = "hosts-query")]
    hosts_query: Option<String>,

    /// Attach live capture data to the query (requires --last max).
    #[arg(long)]
    live: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List interfaces present in the database with their traffic totals.
    List {
        /// Path to the block database.
        #[arg(short = 'd', long, default_value = "/var/lib/flowq/db", env = "FLOWQ_DB")]
        db_path: PathBuf,
    },
    /// Show example invocations.
    Examples,
    /// Show the version.
    Version,
}

/// Optional configuration file: defaults applied below stored queries and
/// flags.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    db_path: Option<PathBuf>,
    query_server_addr: Option<String>,
    hosts_query: Option<String>,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("flowq={}", level).parse().unwrap())
        .add_directive(format!("flowq_core={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match &cli.command {
        Some(Command::Version) => {
            println!("flowq {}", flowq_core::VERSION);
            return ExitCode::SUCCESS;
        }
        Some(Command::Examples) => {
            print_examples();
            return ExitCode::SUCCESS;
        }
        Some(Command::List { db_path }) => {
            init_logging(0, false);
            return run_list(db_path);
        }
        None => {}
    }

    init_logging(cli.verbose, cli.quiet);
    run_query(cli)
}

fn run_query(cli: Cli) -> ExitCode {
    // Configuration file < stored query < command-line flags.
    let config = match &cli.config {
        Some(path) => match load_json::<ConfigFile>(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("failed to load config {}: {}", path.display(), e);
                return ExitCode::from(2);
            }
        },
        None => ConfigFile::default(),
    };

    let mut args = match &cli.stored_query {
        Some(path) => match load_json::<QueryArgs>(path) {
            Ok(a) => a,
            Err(e) => {
                eprintln!("failed to load stored query {}: {}", path.display(), e);
                return ExitCode::from(2);
            }
        },
        None => QueryArgs::default(),
    };

    apply_flags(&mut args, &cli);

    let stmt = match args.prepare() {
        Ok(stmt) => stmt,
        Err(e) => {
            eprint!("{}", e);
            return ExitCode::from(2);
        }
    };

    // Cooperative cancellation: SIGINT/SIGTERM and the optional timeout
    // share one flag.
    let cancel = Arc::new(AtomicBool::new(false));
    let c = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("received shutdown signal");
        c.store(true, Ordering::Relaxed);
    }) {
        warn!("failed to set signal handler: {}", e);
    }
    if let Some(spec) = &cli.timeout {
        match parse_duration_secs(spec) {
            Ok(secs) if secs > 0 => {
                let c = cancel.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_secs(secs));
                    warn!("query timeout reached");
                    c.store(true, Ordering::Relaxed);
                });
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("invalid --timeout: {}", e);
                return ExitCode::from(2);
            }
        }
    }

    let db_path = cli
        .db_path
        .clone()
        .or(config.db_path)
        .unwrap_or_else(|| PathBuf::from("/var/lib/flowq/db"));
    let hosts_query = cli.hosts_query.clone().or(config.hosts_query);
    let server_addr = cli.query_server_addr.clone().or(config.query_server_addr);

    let result = if hosts_query.is_some() || server_addr.is_some() {
        match run_distributed(&args, &stmt, hosts_query, server_addr, &cancel) {
            Ok(result) => result,
            Err(msg) => {
                eprintln!("{}", msg);
                return ExitCode::from(1);
            }
        }
    } else {
        info!(db = %db_path.display(), "running local query");
        LocalRunner::new(db_path).run(&stmt, &cancel)
    };

    render(&stmt, &result, cli.verbose > 0, &cancel)
}

/// Flags override whatever the stored query provided.
fn apply_flags(args: &mut QueryArgs, cli: &Cli) {
    if let Some(query) = &cli.query {
        args.query = query.clone();
    }
    if let Some(ifaces) = &cli.ifaces {
        args.ifaces = ifaces.clone();
    }
    if let Some(condition) = &cli.condition {
        args.condition = condition.clone();
    }
    if let Some(first) = &cli.first {
        args.first = first.clone();
    }
    if let Some(last) = &cli.last {
        args.last = last.clone();
    }
    if let Some(limit) = cli.limit {
        args.num_results = limit;
    }
    if let Some(sort_by) = &cli.sort_by {
        args.sort_by = sort_by.clone();
    }
    if cli.ascending {
        args.sort_ascending = true;
    }
    if cli.in_ {
        args.in_ = true;
    }
    if cli.out {
        args.out = true;
    }
    if cli.sum {
        args.sum = true;
    }
    if let Some(format) = &cli.format {
        args.format = format.clone();
    }
    if cli.resolve {
        args.dns_resolution.enabled = true;
        args.dns_resolution.max_rows = cli.resolve_rows;
        args.dns_resolution.timeout =
            parse_duration_secs(&cli.resolve_timeout).unwrap_or(2).max(1);
    }
    if let Some(max_mem) = cli.max_mem {
        args.max_mem_pct = max_mem;
    }
    if cli.low_mem {
        args.low_mem = true;
    }
    if cli.live {
        args.live = true;
    }
    if let Some(hosts) = &cli.hosts_query {
        args.query_hosts = Some(hosts.clone());
    }
}

fn run_distributed(
    args: &QueryArgs,
    stmt: &Statement,
    hosts_query: Option<String>,
    server_addr: Option<String>,
    cancel: &AtomicBool,
) -> Result<QueryResult, String> {
    use flowq_core::dist::{DistributedRunner, Registry, RemoteRunner};

    let expr = match (hosts_query, server_addr) {
        (Some(expr), _) => expr,
        (None, Some(addr)) => addr,
        (None, None) => unreachable!("caller checked"),
    };
    let hosts = Registry::with_defaults()
        .resolve(&expr)
        .map_err(|e| e.to_string())?;
    info!(hosts = hosts.len(), "running distributed query");

    let runner = RemoteRunner::new()
        .map_err(|e| e.to_string())?
        .with_streaming(stmt.keepalive.is_some());
    Ok(DistributedRunner::new(runner, hosts).run(args, stmt, cancel))
}

fn render(stmt: &Statement, result: &QueryResult, details: bool, cancel: &AtomicBool) -> ExitCode {
    let stdout = std::io::stdout();
    let color = stmt.format == Format::Txt && use_colors();

    // Execution errors still render in machine formats so callers get the
    // structured status; in text they go to stderr.
    if result.status.code == StatusCode::Error && stmt.format == Format::Txt {
        eprintln!("query failed: {}", result.status.message);
        return ExitCode::from(1);
    }

    let mut printer =
        Printer::new(stmt, stdout.lock(), color).with_details(details);
    if let Err(e) = printer.print(result, cancel) {
        eprintln!("failed to render result: {}", e);
        return ExitCode::from(1);
    }

    match result.status.code {
        StatusCode::Ok | StatusCode::Empty | StatusCode::Partial => ExitCode::SUCCESS,
        StatusCode::Error => ExitCode::from(1),
    }
}

fn run_list(db_path: &PathBuf) -> ExitCode {
    let names = match interfaces(db_path) {
        Ok(names) => names,
        Err(e) => {
            eprintln!("failed to read database {}: {}", db_path.display(), e);
            return ExitCode::from(1);
        }
    };
    if names.is_empty() {
        println!("no interfaces in {}", db_path.display());
        return ExitCode::SUCCESS;
    }

    let mut out = std::io::stdout().lock();
    let _ = writeln!(
        out,
        "{:<12} {:>8} {:>12} {:>12} {:>20} {:>20}",
        "iface", "blocks", "packets", "data", "from", "to"
    );
    for name in names {
        match iface_summary(db_path, &name) {
            Ok(s) => {
                let _ = writeln!(
                    out,
                    "{:<12} {:>8} {:>12} {:>12} {:>20} {:>20}",
                    s.iface,
                    s.blocks,
                    format_count(s.totals.sum_packets()),
                    format_bytes(s.totals.sum_bytes()),
                    format_timestamp(s.first),
                    format_timestamp(s.last),
                );
            }
            Err(e) => {
                let _ = writeln!(out, "{:<12} unreadable: {}", name, e);
            }
        }
    }
    ExitCode::SUCCESS
}

fn print_examples() {
    println!(
        "\
Examples:

  Top talkers on eth0 over the last day:
    flowq -i eth0 -f -24h sip,dip

  HTTPS traffic towards a subnet, grouped by source:
    flowq -i eth0 -c \"dport = 443 & dnet = 10.0.0.0/8\" sip

  Time series of a host's traffic in 15-minute bins:
    flowq -i any -c \"sip = 172.16.4.3\" -f -7d time,sip

  All interfaces matching a pattern, CSV output:
    flowq -i /eth[0-9]+/ -e csv -n 50 sip,dip,proto

  Distributed query over two hosts:
    flowq -q \"hostA:7777,hostB:7777\" -i any sip,dip

  Interfaces present in the database:
    flowq list"
    );
}

fn load_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T, String> {
    let data = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&data).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_stored_query() {
        let cli = Cli::parse_from([
            "flowq",
            "-i",
            "eth1",
            "-c",
            "dport = 80",
            "-n",
            "5",
            "--sum",
            "sip,dip",
        ]);
        let mut args = QueryArgs {
            query: "sip".to_string(),
            ifaces: "eth0".to_string(),
            num_results: 100,
            ..QueryArgs::default()
        };
        apply_flags(&mut args, &cli);
        assert_eq!(args.query, "sip,dip");
        assert_eq!(args.ifaces, "eth1");
        assert_eq!(args.condition, "dport = 80");
        assert_eq!(args.num_results, 5);
        assert!(args.sum);
    }

    #[test]
    fn test_stored_query_fields_survive_without_flags() {
        let cli = Cli::parse_from(["flowq", "sip"]);
        let mut args = QueryArgs {
            query: "sip".to_string(),
            ifaces: "eth7".to_string(),
            condition: "proto = 6".to_string(),
            ..QueryArgs::default()
        };
        apply_flags(&mut args, &cli);
        assert_eq!(args.ifaces, "eth7");
        assert_eq!(args.condition, "proto = 6");
    }

    #[test]
    fn test_resolve_flags_map_to_dns_args() {
        let cli = Cli::parse_from([
            "flowq",
            "--resolve",
            "--resolve-rows",
            "7",
            "--resolve-timeout",
            "3s",
            "sip",
        ]);
        let mut args = QueryArgs::default();
        apply_flags(&mut args, &cli);
        assert!(args.dns_resolution.enabled);
        assert_eq!(args.dns_resolution.max_rows, 7);
        assert_eq!(args.dns_resolution.timeout, 3);
    }
}
