use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use tracing::{debug, warn};

use crate::{DateRange, Metric, Month, ReportConfig, Roster, Sbu, Usage, UsageRecord};

/// Mismatches between the roster and the accounting data
///
/// None of these abort a run, they are logged as warnings.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("The user '{0}' has usage records but is absent from the roster")]
    UnknownUser(String),
    #[error("The user '{0}' is listed in the roster but has no usage records")]
    NoRecords(String),
    #[error("The user '{0}' is a member of the cluster account but absent from the roster")]
    NotInRoster(String),
    #[error("The user '{0}' is listed in the roster but is not a member of the cluster account")]
    NotAMember(String),
    #[error("A usage record of '{username}' for {month} lies outside the reported interval")]
    OutOfRange { username: String, month: Month },
}

/// The key of a single table column
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColumnKey {
    pub month: Month,
    pub metric: Metric,
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.month, self.metric.label())
    }
}

/// The usage of one roster user, one cell per month
#[derive(Clone, Debug, PartialEq)]
pub struct UserRow {
    username: String,
    project: String,
    name: String,
    cells: Vec<Usage>,
    active: bool,
}

impl UserRow {
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The roster project of the user
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The display name of the user
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One value per month of the table
    pub fn monthly(&self, metric: Metric) -> impl Iterator<Item = Sbu> + '_ {
        self.cells.iter().map(move |usage| usage.get(metric))
    }

    /// The value summed over all months
    pub fn total(&self, metric: Metric) -> Sbu {
        self.monthly(metric).sum()
    }

    /// Whether the user consumed more SBUs than the active threshold
    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// SBU usage per roster user and month
///
/// Every roster user has exactly one row, in roster order, and every row has
/// one cell per month of the reported interval. Cells without records are zero.
#[derive(Clone, Debug)]
pub struct UsageTable {
    months: Vec<Month>,
    rows: Vec<UserRow>,
    index: HashMap<String, usize>,
}

impl UsageTable {
    /// Builds the table and collects every mismatch between roster and records
    pub fn build(
        roster: &Roster,
        range: &DateRange,
        records: &[UsageRecord],
        config: &ReportConfig,
    ) -> (Self, Vec<ValidationError>) {
        let months = range.months();
        let columns = months
            .iter()
            .enumerate()
            .map(|(i, &month)| (month, i))
            .collect::<HashMap<_, _>>();

        let mut rows = Vec::with_capacity(roster.len());
        let mut index = HashMap::with_capacity(roster.len());
        for project in roster.projects() {
            for member in project.members() {
                index.insert(member.username().to_owned(), rows.len());
                rows.push(UserRow {
                    username: member.username().to_owned(),
                    project: project.name().to_owned(),
                    name: member.name().to_owned(),
                    cells: vec![Usage::default(); months.len()],
                    active: false,
                });
            }
        }

        let mut warnings = Vec::new();
        let mut unknown = BTreeSet::new();
        let mut seen = HashSet::new();
        for record in records {
            let row = match index.get(record.username()) {
                Some(&row) => row,
                None => {
                    unknown.insert(record.username());
                    continue;
                }
            };
            seen.insert(record.username());

            match columns.get(&record.month()) {
                Some(&column) => rows[row].cells[column].add(record.usage()),
                None => warnings.push(ValidationError::OutOfRange {
                    username: record.username().to_owned(),
                    month: record.month(),
                }),
            }
        }
        warnings.extend(
            unknown
                .into_iter()
                .map(|username| ValidationError::UnknownUser(username.to_owned())),
        );
        warnings.extend(
            rows.iter()
                .filter(|row| !seen.contains(row.username.as_str()))
                .map(|row| ValidationError::NoRecords(row.username.clone())),
        );

        let threshold = config.active_threshold();
        for row in &mut rows {
            row.active = row.total(Metric::Sbu) > threshold;
        }

        for warning in &warnings {
            warn!("{}", warning);
        }
        debug!("Built usage table with {} users and {} months", rows.len(), months.len());

        (Self { months, rows, index }, warnings)
    }

    pub fn months(&self) -> &[Month] {
        &self.months
    }

    pub fn rows(&self) -> &[UserRow] {
        &self.rows
    }

    /// Every column, months in order and metrics within each month
    pub fn columns(&self) -> impl Iterator<Item = ColumnKey> + '_ {
        self.months
            .iter()
            .flat_map(|&month| {
                Metric::ALL
                    .into_iter()
                    .map(move |metric| ColumnKey { month, metric })
            })
    }

    pub fn row(&self, username: &str) -> Option<&UserRow> {
        self.index.get(username).map(|&row| &self.rows[row])
    }

    /// A single cell, `None` for unknown users and months outside the table
    pub fn get(&self, username: &str, column: ColumnKey) -> Option<Sbu> {
        let month = self.months.iter().position(|&month| month == column.month)?;
        Some(self.row(username)?.cells[month].get(column.metric))
    }

    /// Sum over all users and months
    pub fn total(&self, metric: Metric) -> Sbu {
        self.rows.iter().map(|row| row.total(metric)).sum()
    }
}

/// Compares the roster against the member listing of the cluster account
pub fn validate_members(roster: &Roster, members: &[String]) -> Vec<ValidationError> {
    let listed = members.iter().map(String::as_str).collect::<BTreeSet<_>>();

    let mut warnings = listed
        .iter()
        .filter(|username| !roster.contains(username))
        .map(|&username| ValidationError::NotInRoster(username.to_owned()))
        .collect::<Vec<_>>();
    warnings.extend(
        roster
            .usernames()
            .filter(|username| !listed.contains(username))
            .map(|username| ValidationError::NotAMember(username.to_owned())),
    );

    for warning in &warnings {
        warn!("{}", warning);
    }
    warnings
}
