use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sbu_reporter::{
    fetch_usage, render_plot, report_filename, validate_members, write_reports, AccountingSource,
    AccuseCommand, AggregateReport, DateRange, RecordedOutput, ReportConfig, Roster, UsageTable,
};

/// Collects, aggregates and reports the SBU usage of the users in a roster
#[derive(Debug, Parser)]
#[clap(version)]
struct Args {
    /// A .yaml file with project and user information
    roster: PathBuf,
    /// Only count SBUs charged to this accounting project
    #[clap(short, long)]
    project: Option<String>,
    /// The start of the interval as YYYY, MM-YYYY or DD-MM-YYYY,
    /// defaults to the start of the current year
    #[clap(short, long)]
    start: Option<String>,
    /// The end of the interval as YYYY, MM-YYYY or DD-MM-YYYY,
    /// defaults to the start of the current month
    #[clap(short, long)]
    end: Option<String>,
    /// The directory the reports are written to
    #[clap(short, long, default_value = ".")]
    output_dir: PathBuf,
    /// A .yaml file overriding column labels, accounting programs and the active threshold
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Read saved accounting output (with a User column) instead of querying the cluster
    #[clap(long)]
    accounting_output: Option<PathBuf>,
    /// Compare the roster with the members of the cluster account
    #[clap(long)]
    check_members: bool,
    /// Don't render the usage plot
    #[clap(long)]
    no_plot: bool,
    /// The log level, RUST_LOG takes precedence
    #[clap(long, default_value = "info")]
    log_level: String,
}

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    let config = match &args.config {
        Some(path) => ReportConfig::load(path)?,
        None => ReportConfig::default(),
    };
    let roster = Roster::from_path(&args.roster)?;
    info!(
        "Loaded {} users in {} projects from {}",
        roster.len(),
        roster.projects().len(),
        args.roster.display(),
    );

    let today = chrono::Local::now().date_naive();
    let range = DateRange::resolve(args.start.as_deref(), args.end.as_deref(), today)
        .context("Invalid reporting interval")?;
    info!("Reporting from {} to {}", range.start(), range.end());

    let source: Box<dyn AccountingSource> = match &args.accounting_output {
        Some(path) => Box::new(RecordedOutput::new(path)),
        None => Box::new(AccuseCommand::new(&config.accounting)),
    };

    if args.check_members {
        match source.members().context("Failed to list the members of the cluster account")? {
            Some(members) => {
                validate_members(&roster, &members);
            }
            None => warn!("Saved accounting output lists no members, skipping the check"),
        }
    }

    let usernames = roster.usernames().collect::<Vec<_>>();
    let records = fetch_usage(source.as_ref(), &usernames, &range, args.project.as_deref())
        .context("Failed to fetch SBU usage")?;
    let (table, warnings) = UsageTable::build(&roster, &range, &records, &config);
    if !warnings.is_empty() {
        info!("Found {} mismatches between roster and accounting data", warnings.len());
    }
    let report = AggregateReport::new(&roster, &table, &config);

    write_reports(&args.output_dir, &range, &table, &report, &config)
        .with_context(|| format!("Failed to write reports to {}", args.output_dir.display()))?;
    if !args.no_plot {
        let path = args
            .output_dir
            .join(report_filename(&config.output_prefix, &range, ".png"));
        render_plot(&report, &path)
            .with_context(|| format!("Failed to render the plot to {}", path.display()))?;
    }

    let total = report.grand_total();
    match total.percentage() {
        Some(percentage) => info!(
            "Total usage: {} SBU, {}% of the requested SBUs",
            total.total(),
            percentage
        ),
        None => info!("Total usage: {} SBU", total.total()),
    }

    Ok(())
}
