pub use self::{
    aggregate::{percentage, AggregateReport, ProjectUsage},
    config::{AccountingConfig, ColumnLabels, ConfigError, ReportConfig},
    fetch::{
        fetch_usage, parse_members, parse_usage, AccountingSource, AccuseCommand, FetchError,
        RawUsage, RecordedOutput,
    },
    period::{DateError, DateRange},
    plot::{render_plot, PlotError},
    report::{
        read_project_report, report_filename, write_accumulated_report, write_percentage_report,
        write_project_report, write_reports, write_usage_table, ProjectTotals, ReportError,
        ReportFiles,
    },
    roster::{Member, Project, Roster, SchemaError},
    table::{validate_members, ColumnKey, UsageTable, UserRow, ValidationError},
    usage::{Metric, Month, MonthError, Sbu, Usage, UsageRecord},
};

mod aggregate;
mod config;
mod fetch;
mod period;
mod plot;
mod report;
mod roster;
mod table;
mod usage;
