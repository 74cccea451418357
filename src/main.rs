use anyhow::{bail, Context, Result};
use clap::Parser;
use dev_mkdb::builder::{BuildReport, DbBuilder};
use dev_mkdb::cli::{Cli, LookupQuery, OutputFormat};
use dev_mkdb::lookup::DeviceDb;
use std::io::IsTerminal;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber
///
/// Warnings (unreadable directory entries) always reach stderr; `--debug`
/// adds the build trace.
fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::TRACE
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(debug)
        .without_time()
        .init();
}

fn print_report(report: &BuildReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
    }
    Ok(())
}

/// Print the name for one device, failing when it is not in the database
fn run_lookup(db_path: &Path, query: LookupQuery, format: OutputFormat) -> Result<()> {
    let db = DeviceDb::open(db_path).with_context(|| format!("{}", db_path.display()))?;
    let Some(name) = db.lookup(query.kind, query.id)? else {
        bail!("no {} device {} in {}", query.kind, query.id, db_path.display());
    };

    match format {
        OutputFormat::Text => println!("{name}"),
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "kind": query.kind,
                "major": query.id.major(),
                "minor": query.id.minor(),
                "name": name,
            })
        ),
    }
    Ok(())
}

/// Print every record in the database
fn run_list(db_path: &Path, format: OutputFormat) -> Result<()> {
    let db = DeviceDb::open(db_path).with_context(|| format!("{}", db_path.display()))?;
    if db.is_empty() {
        tracing::warn!("{}: database has no records", db_path.display());
    }
    let records = db.records()?;

    match format {
        OutputFormat::Text => {
            for record in &records {
                println!(
                    "{}\t{}\t{}",
                    record.kind,
                    record.device_id,
                    record.name_lossy()
                );
            }
        }
        OutputFormat::Json => {
            let rows: Vec<_> = records
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "kind": r.kind,
                        "major": r.device_id.major(),
                        "minor": r.device_id.minor(),
                        "name": r.name_lossy(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let config = args.build_config();

    if let Some(query) = args.lookup {
        return run_lookup(&config.db_path, query, args.format);
    }
    if args.list {
        return run_list(&config.db_path, args.format);
    }

    // Bucket size and scratch path only matter when building
    config.validate()?;
    let report = DbBuilder::new(config).run()?;
    print_report(&report, args.format)?;

    Ok(())
}
