use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::{AggregateReport, DateRange, Metric, ProjectUsage, ReportConfig, Sbu, UsageTable};

/// Written in place of a percentage that cannot be computed
pub const NOT_AVAILABLE: &str = "N/A";

/// Possible errors while writing or reading report files
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("The report has no '{0}' column")]
    MissingColumn(String),
    #[error("Row {row}: '{value}' in column '{column}' is not a number")]
    Number {
        row: usize,
        column: String,
        value: String,
    },
}

/// The name of an output file, `<prefix>_<start>_<end><suffix>`
pub fn report_filename(prefix: &str, range: &DateRange, suffix: &str) -> String {
    format!(
        "{}_{}_{}{}",
        prefix,
        range.start().format("%Y-%m-%d"),
        range.end().format("%Y-%m-%d"),
        suffix,
    )
}

/// The files written by [`write_reports`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportFiles {
    pub users: PathBuf,
    pub projects: PathBuf,
    pub accumulated: PathBuf,
    pub percentage: PathBuf,
}

/// Writes the per-user table and the three per-project reports into `dir`
pub fn write_reports(
    dir: &Path,
    range: &DateRange,
    table: &UsageTable,
    report: &AggregateReport,
    config: &ReportConfig,
) -> Result<ReportFiles, ReportError> {
    std::fs::create_dir_all(dir)?;
    let path = |suffix: &str| dir.join(report_filename(&config.output_prefix, range, suffix));
    let files = ReportFiles {
        users: path("_users.csv"),
        projects: path("_projects.csv"),
        accumulated: path("_accumulated.csv"),
        percentage: path("_percentage.csv"),
    };

    write_usage_table(File::create(&files.users)?, table, config)?;
    info!("Wrote {}", files.users.display());
    write_project_report(File::create(&files.projects)?, report, config)?;
    info!("Wrote {}", files.projects.display());
    write_accumulated_report(File::create(&files.accumulated)?, report, config)?;
    info!("Wrote {}", files.accumulated.display());
    write_percentage_report(File::create(&files.percentage)?, report, config)?;
    info!("Wrote {}", files.percentage.display());

    Ok(files)
}

/// Writes one line per user with every (month, metric) column and the totals
pub fn write_usage_table<W: io::Write>(
    writer: W,
    table: &UsageTable,
    config: &ReportConfig,
) -> Result<(), ReportError> {
    let labels = &config.labels;
    let mut writer = csv::Writer::from_writer(writer);

    let mut header = vec![labels.username.clone(), labels.project.clone(), labels.name.clone()];
    header.extend(table.columns().map(|column| column.to_string()));
    header.extend(Metric::ALL.iter().map(|metric| format!("{} {}", labels.sum, metric.label())));
    header.push(labels.active.clone());
    writer.write_record(&header)?;

    for row in table.rows() {
        let mut record = vec![
            row.username().to_owned(),
            row.project().to_owned(),
            row.name().to_owned(),
        ];
        for month in 0..table.months().len() {
            for metric in Metric::ALL {
                record.push(row.monthly(metric).nth(month).unwrap_or(Sbu::ZERO).to_string());
            }
        }
        record.extend(Metric::ALL.iter().map(|&metric| row.total(metric).to_string()));
        record.push(row.is_active().to_string());
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes one line per project followed by the grand total
pub fn write_project_report<W: io::Write>(
    writer: W,
    report: &AggregateReport,
    config: &ReportConfig,
) -> Result<(), ReportError> {
    let labels = &config.labels;
    let tail = [labels.sum.clone(), labels.percentage.clone()];
    write_project_table(writer, report, config, &tail, |project| {
        let mut cells = project.monthly().iter().map(Sbu::to_string).collect::<Vec<_>>();
        cells.push(project.total().to_string());
        cells.push(format_percentage(project.percentage()));
        cells
    })
}

/// Like [`write_project_report`], with every month holding the running sum
/// up to and including that month
pub fn write_accumulated_report<W: io::Write>(
    writer: W,
    report: &AggregateReport,
    config: &ReportConfig,
) -> Result<(), ReportError> {
    let tail = [config.labels.sum.clone()];
    write_project_table(writer, report, config, &tail, |project| {
        let mut cells = project.accumulated().iter().map(Sbu::to_string).collect::<Vec<_>>();
        cells.push(project.total().to_string());
        cells
    })
}

/// The running sum of every month as a percentage of the requested SBUs
///
/// Projects without a quota have `N/A` in every cell.
pub fn write_percentage_report<W: io::Write>(
    writer: W,
    report: &AggregateReport,
    config: &ReportConfig,
) -> Result<(), ReportError> {
    let tail = [config.labels.percentage.clone()];
    write_project_table(writer, report, config, &tail, |project| {
        let mut cells = project
            .accumulated_percentage()
            .into_iter()
            .map(format_percentage)
            .collect::<Vec<_>>();
        cells.push(format_percentage(project.percentage()));
        cells
    })
}

/// Writes the project columns, one column per month, `tail` and the active
/// users, with `cells` filling in the months and `tail`
fn write_project_table<W, F>(
    writer: W,
    report: &AggregateReport,
    config: &ReportConfig,
    tail: &[String],
    cells: F,
) -> Result<(), ReportError>
where
    W: io::Write,
    F: Fn(&ProjectUsage) -> Vec<String>,
{
    let labels = &config.labels;
    let mut writer = csv::Writer::from_writer(writer);

    let mut header = vec![labels.project.clone(), labels.pi.clone(), labels.sbu_requested.clone()];
    header.extend(report.months().iter().map(|month| month.to_string()));
    header.extend(tail.iter().cloned());
    header.push(labels.active.clone());
    writer.write_record(&header)?;

    for project in report.projects().iter().chain([report.grand_total()]) {
        let mut record = vec![
            project.name().to_owned(),
            project.pi().unwrap_or_default().to_owned(),
            project.requested().map(|sbu| sbu.to_string()).unwrap_or_default(),
        ];
        record.extend(cells(project));
        record.push(project.active().join(", "));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

fn format_percentage(percentage: Option<f64>) -> String {
    match percentage {
        Some(percentage) => format!("{:.2}", percentage),
        None => NOT_AVAILABLE.to_owned(),
    }
}

/// The numbers of one line of a project report
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectTotals {
    pub project: String,
    pub requested: Option<Sbu>,
    pub monthly: Vec<Sbu>,
    pub total: Sbu,
    pub percentage: Option<f64>,
}

/// Reads a report written by [`write_project_report`]
///
/// Every line is returned, including the grand total.
pub fn read_project_report<R: io::Read>(
    reader: R,
    config: &ReportConfig,
) -> Result<Vec<ProjectTotals>, ReportError> {
    let labels = &config.labels;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let header = reader.headers()?.clone();
    let position = |label: &str| {
        header
            .iter()
            .position(|column| column == label)
            .ok_or_else(|| ReportError::MissingColumn(label.to_owned()))
    };
    let project_column = position(&labels.project)?;
    let requested_column = position(&labels.sbu_requested)?;
    let sum_column = position(&labels.sum)?;
    let percentage_column = position(&labels.percentage)?;

    let mut totals = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let number = |column: usize| -> Result<Option<Sbu>, ReportError> {
            match record.get(column).unwrap_or_default() {
                "" => Ok(None),
                value => value.parse().map(Some).map_err(|_| ReportError::Number {
                    row: row + 1,
                    column: header.get(column).unwrap_or_default().to_owned(),
                    value: value.to_owned(),
                }),
            }
        };

        let monthly = (requested_column + 1..sum_column)
            .map(|column| Ok(number(column)?.unwrap_or(Sbu::ZERO)))
            .collect::<Result<Vec<_>, ReportError>>()?;
        let percentage = match record.get(percentage_column).unwrap_or_default() {
            "" | NOT_AVAILABLE => None,
            value => Some(value.parse::<f64>().map_err(|_| ReportError::Number {
                row: row + 1,
                column: labels.percentage.clone(),
                value: value.to_owned(),
            })?),
        };

        totals.push(ProjectTotals {
            project: record.get(project_column).unwrap_or_default().to_owned(),
            requested: number(requested_column)?,
            monthly,
            total: number(sum_column)?.unwrap_or(Sbu::ZERO),
            percentage,
        });
    }

    Ok(totals)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::{Month, Roster, Usage, UsageRecord};

    const ROSTER: &str = "\
acct1:
  PI: Walt Disney
  SBU requested: 1000
  users:
    alice: Alice Liddell
    bob: Bob Builder
acct2:
  users: [dave]
";

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2019, 2, 28).unwrap(),
        )
        .unwrap()
    }

    fn fixture() -> (UsageTable, AggregateReport) {
        let roster = Roster::from_yaml_str(ROSTER).unwrap();
        let jan = Month::new(2019, 1).unwrap();
        let feb = Month::new(2019, 2).unwrap();
        let records = [
            UsageRecord::new("alice", jan, "x", Usage::new(Sbu::from_num(100), Sbu::from_num(2))),
            UsageRecord::new("bob", jan, "x", Usage::new(Sbu::from_num(50), Sbu::ZERO)),
            UsageRecord::new("bob", feb, "x", Usage::new(Sbu::from_num(0.125), Sbu::ZERO)),
            UsageRecord::new("dave", feb, "x", Usage::new(Sbu::from_num(7.3), Sbu::ZERO)),
        ];
        let config = ReportConfig::default();
        let (table, _) = UsageTable::build(&roster, &range(), &records, &config);
        let report = AggregateReport::new(&roster, &table, &config);
        (table, report)
    }

    #[test]
    fn filename_contains_dates() {
        assert_eq!(
            report_filename("Cluster_usage", &range(), ".csv"),
            "Cluster_usage_2019-01-01_2019-02-28.csv"
        );
    }

    #[test]
    fn project_report_layout() {
        let (_, report) = fixture();
        let mut buffer = Vec::new();
        write_project_report(&mut buffer, &report, &ReportConfig::default()).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines = text.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], "project,PI,SBU requested,2019-01,2019-02,sum,% SBU,active");
        assert_eq!(
            lines[1],
            "acct1,Walt Disney,1000,150,0.125,150.125,15.01,\"Alice Liddell, Bob Builder\""
        );
        assert!(lines[2].starts_with("acct2,,,0,"));
        assert!(lines[2].ends_with(",N/A,dave"));
        assert!(lines[3].starts_with("sum,,1000,"));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn project_report_round_trip() {
        let (_, report) = fixture();
        let config = ReportConfig::default();
        let mut buffer = Vec::new();
        write_project_report(&mut buffer, &report, &config).unwrap();

        let totals = read_project_report(buffer.as_slice(), &config).unwrap();
        assert_eq!(totals.len(), 3);
        let written = report.projects().iter().chain([report.grand_total()]);
        for (read, written) in totals.iter().zip(written) {
            assert_eq!(read.project, written.name());
            assert_eq!(read.requested, written.requested());
            assert_eq!(read.monthly, written.monthly());
            assert_eq!(read.total, written.total());
            assert_eq!(read.percentage, written.percentage());
        }
    }

    #[test]
    fn usage_table_layout() {
        let (table, _) = fixture();
        let mut buffer = Vec::new();
        write_usage_table(&mut buffer, &table, &ReportConfig::default()).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines = text.lines().collect::<Vec<_>>();

        assert_eq!(
            lines[0],
            "username,project,name,\
             2019-01 SBU,2019-01 Restituted,2019-02 SBU,2019-02 Restituted,\
             sum SBU,sum Restituted,active"
        );
        assert_eq!(lines[1], "alice,acct1,Alice Liddell,100,2,0,0,100,2,true");
        assert_eq!(lines.len(), 4);
    }

    fn lines<F>(write: F) -> Vec<String>
    where
        F: Fn(&mut Vec<u8>, &AggregateReport, &ReportConfig) -> Result<(), ReportError>,
    {
        let (_, report) = fixture();
        let mut buffer = Vec::new();
        write(&mut buffer, &report, &ReportConfig::default()).unwrap();
        String::from_utf8(buffer).unwrap().lines().map(str::to_owned).collect()
    }

    #[test]
    fn accumulated_report_layout() {
        let lines = lines(|w, r, c| write_accumulated_report(w, r, c));
        assert_eq!(lines[0], "project,PI,SBU requested,2019-01,2019-02,sum,active");
        assert_eq!(
            lines[1],
            "acct1,Walt Disney,1000,150,150.125,150.125,\"Alice Liddell, Bob Builder\""
        );
        assert!(lines[2].starts_with("acct2,,,0,7.3"));
        assert!(lines[3].starts_with("sum,,1000,150,157.4"));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn percentage_report_layout() {
        let lines = lines(|w, r, c| write_percentage_report(w, r, c));
        assert_eq!(lines[0], "project,PI,SBU requested,2019-01,2019-02,% SBU,active");
        assert_eq!(
            lines[1],
            "acct1,Walt Disney,1000,15.00,15.01,15.01,\"Alice Liddell, Bob Builder\""
        );
        // no quota, nothing to compare against
        assert_eq!(lines[2], "acct2,,,N/A,N/A,N/A,dave");
        assert!(lines[3].starts_with("sum,,1000,15.00,15.74,15.74,"));
    }

    #[test]
    fn read_rejects_garbage() {
        let config = ReportConfig::default();
        let text = "project,PI,SBU requested,2019-01,sum,% SBU,active\na,,lots,1,1,N/A,\n";
        assert!(matches!(
            read_project_report(text.as_bytes(), &config),
            Err(ReportError::Number { row: 1, .. })
        ));
        assert!(matches!(
            read_project_report("project,sum\n".as_bytes(), &config),
            Err(ReportError::MissingColumn(column)) if column == "SBU requested"
        ));
    }

    #[test]
    fn write_reports_to_directory() {
        let (table, report) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports");
        let config = ReportConfig::default();

        let files = write_reports(&out, &range(), &table, &report, &config).unwrap();
        assert_eq!(files.projects, out.join("Cluster_usage_2019-01-01_2019-02-28_projects.csv"));
        assert_eq!(
            files.percentage,
            out.join("Cluster_usage_2019-01-01_2019-02-28_percentage.csv")
        );
        for file in [&files.users, &files.accumulated, &files.percentage] {
            assert!(file.is_file());
        }

        let totals = read_project_report(File::open(&files.projects).unwrap(), &config).unwrap();
        let grand = totals.last().unwrap();
        assert_eq!(grand.project, "sum");
        assert_eq!(grand.total, report.grand_total().total());
    }
}
