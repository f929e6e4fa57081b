use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use rusqlite::Connection;
use std::env;
use std::path::{Path, PathBuf};

use circulation_recon::{
    get_import_log, get_market_rates, get_rate_distribution, get_snapshots_for_date,
    latest_snapshot_date, setup_database, ReconConfig, ReconciliationEngine, ReconciliationReport,
};

const DEFAULT_CONFIG: &str = "circulation.json";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    match cli.command.as_str() {
        "import" => run_import(&cli),
        "audit" => run_audit(&cli),
        "show" => run_show(&cli),
        "init-config" => run_init_config(&cli),
        _ => {
            print_usage();
            std::process::exit(2);
        }
    }
}

// ============================================================================
// ARGUMENTS
// ============================================================================

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    command: String,
    config: Option<PathBuf>,
    date: Option<NaiveDate>,
    dry_run: bool,
    positional: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut cli = CliArgs::default();
    let mut iter = args.iter();

    cli.command = iter.next().cloned().unwrap_or_default();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                cli.config = Some(PathBuf::from(path));
            }
            "--date" => {
                let value = iter.next().context("--date needs YYYY-MM-DD")?;
                let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .with_context(|| format!("Invalid --date '{}', expected YYYY-MM-DD", value))?;
                cli.date = Some(date);
            }
            "--dry-run" => cli.dry_run = true,
            other if other.starts_with("--") => bail!("Unknown option: {}", other),
            other => cli.positional.push(other.to_string()),
        }
    }

    Ok(cli)
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  circulation-recon import [--config PATH] [--date YYYY-MM-DD] [--dry-run]");
    eprintln!("  circulation-recon audit [--config PATH]");
    eprintln!("  circulation-recon show [--config PATH] [--date YYYY-MM-DD]");
    eprintln!("  circulation-recon init-config PATH");
}

/// Explicit --config, else ./circulation.json when present, else built-in defaults
fn load_config(cli: &CliArgs) -> Result<ReconConfig> {
    match &cli.config {
        Some(path) => ReconConfig::from_file(path),
        None if Path::new(DEFAULT_CONFIG).exists() => ReconConfig::from_file(DEFAULT_CONFIG),
        None => {
            log::info!("No config file, using built-in defaults");
            Ok(ReconConfig::default())
        }
    }
}

fn open_store(config: &ReconConfig) -> Result<Connection> {
    let conn = Connection::open(&config.files.database)
        .with_context(|| format!("Failed to open database {:?}", config.files.database))?;
    setup_database(&conn)?;
    Ok(conn)
}

// ============================================================================
// COMMANDS
// ============================================================================

fn run_import(cli: &CliArgs) -> Result<()> {
    println!("📰 Circulation Import - exports → daily snapshot");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = load_config(cli)?;
    let snapshot_date = cli.date.unwrap_or_else(|| Local::now().date_naive());

    println!("\n🔧 Opening database {:?}...", config.files.database);
    let mut conn = open_store(&config)?;

    println!("\n📂 Reconciling exports for {}...", snapshot_date);
    let engine = ReconciliationEngine::new(config);
    let report = engine.run(&mut conn, snapshot_date, cli.dry_run)?;

    print_report(&report, engine.config());

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if cli.dry_run {
        println!("✅ Dry run complete, nothing written");
    } else {
        println!("🎉 Snapshot {} stored (run {})", snapshot_date, report.run_id);
    }

    Ok(())
}

fn print_report(report: &ReconciliationReport, config: &ReconConfig) {
    let inputs = &report.inputs;
    println!("✓ Rates: {} rows, {} catalog entries", inputs.rate_rows, inputs.catalog_entries);
    if inputs.catalog_overwritten > 0 {
        println!("  ⚠️  {} duplicate rate ids overwritten", inputs.catalog_overwritten);
    }
    println!(
        "✓ Vacations: {} intervals, {} active today, {} dropped",
        inputs.vacation_intervals, inputs.vacations_active, inputs.vacation_intervals_dropped
    );

    println!("\n📊 Circulation by publication:");
    for (code, m) in &report.aggregation.metrics {
        let sold = config.publication(code).map_or(false, |p| p.sold);
        println!(
            "   {:<4} active {:>6}  deliverable {:>6}  vacation {:>5}  mail {:>6}  carrier {:>6}  digital {:>6}{}",
            code,
            m.total_active,
            m.deliverable,
            m.on_vacation,
            m.mail,
            m.carrier,
            m.digital,
            if sold { "  (sold)" } else { "" }
        );
    }

    let t = &report.totals;
    println!(
        "\n   TOTAL active {} / deliverable {} / on vacation {} across {} publications",
        t.total_active, t.deliverable, t.on_vacation, t.publications
    );

    let skipped = &report.aggregation.skipped;
    println!(
        "\n🔍 Skipped {} rows: {} inactive, {} malformed, {} unresolved rate, {} unknown publication",
        skipped.total(),
        skipped.inactive,
        skipped.malformed,
        skipped.unresolved_rate,
        skipped.unknown_publication
    );
    if !report.audit.is_clean() {
        println!("   ⚠️  {}", report.audit.summary());
        println!("   Run `circulation-recon audit` for the full list");
    }

    println!("\n💲 Market rates: {}", report.market_rates.len());
}

fn run_audit(cli: &CliArgs) -> Result<()> {
    println!("🔍 Rate Audit - rate ids missing from the rate export");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = load_config(cli)?;
    let audit = ReconciliationEngine::new(config).audit()?;

    println!("\n{}", audit.summary());

    if audit.is_clean() {
        println!("\n✅ Every active subscription resolves to a known rate");
        return Ok(());
    }

    println!("\n   {:<12} {:>11}", "RATE ID", "SUBSCRIBERS");
    for missing in &audit.missing {
        println!("   {:<12} {:>11}", missing.rate_id, missing.subscribers);
    }

    Ok(())
}

fn run_show(cli: &CliArgs) -> Result<()> {
    let config = load_config(cli)?;
    let conn = open_store(&config)?;

    let date = match cli.date {
        Some(date) => date,
        None => match latest_snapshot_date(&conn)? {
            Some(date) => date,
            None => {
                println!("❌ No snapshots stored yet. Run: circulation-recon import");
                return Ok(());
            }
        },
    };

    println!("📰 Snapshot {}", date);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let snapshots = get_snapshots_for_date(&conn, date)?;
    if snapshots.is_empty() {
        println!("No snapshot stored for {}", date);
    }

    for row in &snapshots {
        println!(
            "\n{} - {} ({})",
            row.paper_code, row.paper_name, row.business_unit
        );
        println!(
            "   active {}  deliverable {}  vacation {}  mail {}  carrier {}  digital {}",
            row.total_active,
            row.deliverable,
            row.on_vacation,
            row.mail_delivery,
            row.carrier_delivery,
            row.digital_only
        );

        for rate in get_rate_distribution(&conn, date, &row.paper_code)? {
            println!(
                "   #{:<2} rate {:<10} {:>6} subscribers {:>6.2}%",
                rate.rank_position, rate.rate_id, rate.subscriber_count, rate.percentage
            );
        }
    }

    let market = get_market_rates(&conn, None)?;
    if !market.is_empty() {
        println!("\n💲 Market rates:");
        for entry in &market {
            println!(
                "   {:<4} {:<6} {:>10}  ({} / year)  {}",
                entry.publication,
                entry.length,
                circulation_recon::db::money(entry.rate),
                circulation_recon::db::money(entry.annualized),
                entry.description
            );
        }
    }

    if let Some(last) = get_import_log(&conn, 1)?.first() {
        println!(
            "\n🕑 Last import: {} for {} ({})",
            last.import_date.format("%Y-%m-%d %H:%M"),
            last.snapshot_date,
            last.status
        );
    }

    Ok(())
}

fn run_init_config(cli: &CliArgs) -> Result<()> {
    let path = match cli.positional.first() {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(DEFAULT_CONFIG),
    };

    if path.exists() {
        bail!("Refusing to overwrite existing config {:?}", path);
    }

    ReconConfig::default().write_to(&path)?;
    println!("✓ Default config written to {:?}", path);

    Ok(())
}
