use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use tracing::{debug, info};

use crate::{AccountingConfig, DateRange, Month, Sbu, Usage, UsageRecord};

/// Possible errors while querying or parsing accounting data
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("'{program}' produced output that is not valid UTF-8")]
    Encoding { program: String },
    #[error("Failed to read accounting output {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No usage table found (expected Month, Account, SBU's and Restituted)")]
    MissingHeader,
    #[error("Line {line} of the accounting output is malformed: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("Line {line} of the accounting output names no user")]
    UnknownUser { line: usize },
    #[error("The member listing contains no table (expected a header with User and Group)")]
    MissingMembersHeader,
}

/// Unparsed output of a single accounting query
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawUsage {
    /// The user the query was made for, `None` if it covered several users
    pub user: Option<String>,
    pub text: String,
}

/// Something that can report SBU usage for a set of users
pub trait AccountingSource {
    /// Queries the usage of `usernames` within `range`
    fn query(&self, usernames: &[&str], range: &DateRange) -> Result<Vec<RawUsage>, FetchError>;

    /// The usernames the cluster knows as members of the account, if the
    /// source is able to tell
    fn members(&self) -> Result<Option<Vec<String>>, FetchError> {
        Ok(None)
    }
}

/// Queries the cluster's accounting programs, one usage call per user
#[derive(Clone, Debug)]
pub struct AccuseCommand {
    usage_program: String,
    members_program: String,
}

impl AccuseCommand {
    pub fn new(config: &AccountingConfig) -> Self {
        Self {
            usage_program: config.usage_program.clone(),
            members_program: config.members_program.clone(),
        }
    }
}

impl AccountingSource for AccuseCommand {
    fn query(&self, usernames: &[&str], range: &DateRange) -> Result<Vec<RawUsage>, FetchError> {
        let start = range.start().format("%d-%m-%Y").to_string();
        let end = range.end().format("%d-%m-%Y").to_string();

        usernames
            .iter()
            .map(|&user| {
                let text = run(&self.usage_program, &["-u", user, "-s", &start, "-e", &end])?;
                Ok(RawUsage {
                    user: Some(user.to_owned()),
                    text,
                })
            })
            .collect()
    }

    fn members(&self) -> Result<Option<Vec<String>>, FetchError> {
        let text = run(&self.members_program, &[])?;
        parse_members(&text).map(Some)
    }
}

/// Replays accounting output that was saved to a file
///
/// The saved table has to carry a `User` column, since a single file covers
/// every user.
#[derive(Clone, Debug)]
pub struct RecordedOutput {
    path: PathBuf,
}

impl RecordedOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AccountingSource for RecordedOutput {
    fn query(&self, _usernames: &[&str], _range: &DateRange) -> Result<Vec<RawUsage>, FetchError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| FetchError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(vec![RawUsage { user: None, text }])
    }
}

fn run(program: &str, args: &[&str]) -> Result<String, FetchError> {
    debug!("Running {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| FetchError::Spawn {
            program: program.to_owned(),
            source,
        })?;

    if !output.status.success() {
        return Err(FetchError::Failed {
            program: program.to_owned(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    String::from_utf8(output.stdout).map_err(|_| FetchError::Encoding {
        program: program.to_owned(),
    })
}

/// Queries `source` and parses everything it returns into usage records
///
/// With a `project`, only SBUs charged to that accounting project are kept.
pub fn fetch_usage<S>(
    source: &S,
    usernames: &[&str],
    range: &DateRange,
    project: Option<&str>,
) -> Result<Vec<UsageRecord>, FetchError>
where
    S: AccountingSource + ?Sized,
{
    let mut records = Vec::new();
    for raw in source.query(usernames, range)? {
        records.extend(parse_usage(&raw.text, raw.user.as_deref(), project)?);
    }
    info!("Fetched {} usage records for {} users", records.len(), usernames.len());

    Ok(records)
}

/// One data line of the usage table
#[derive(Debug, serde::Deserialize)]
struct UsageRow {
    #[serde(rename = "Month")]
    month: Month,
    #[serde(rename = "Account")]
    account: String,
    #[serde(rename = "SBU's")]
    charged: String,
    #[serde(rename = "Restituted")]
    restituted: String,
    #[serde(rename = "User", default)]
    user: Option<String>,
}

const REQUIRED_COLUMNS: [&str; 4] = ["Month", "Account", "SBU's", "Restituted"];

/// Parses the output of an accounting query
///
/// The output is a whitespace aligned table, possibly surrounded by banners,
/// separator lines and a totals line:
///
/// ```text
/// Usage of user1 from 01-01-2019 to 01-03-2019
///
/// Month    Account  SBU's      Restituted
/// -------  -------  ---------  ----------
/// 2019-01  proj1    100:00:00  0:00:00
/// 2019-02  proj1    12:30:00   2:30:00
/// Total             112:30:00  2:30:00
/// ```
///
/// The SBUs of a line are its charged time minus its restituted time, in hours.
/// Lines are attributed to their `User` column if there is one and to `user`
/// otherwise.
pub fn parse_usage(
    text: &str,
    user: Option<&str>,
    project: Option<&str>,
) -> Result<Vec<UsageRecord>, FetchError> {
    let mut lines = text.lines().enumerate().map(|(i, line)| (i + 1, line));

    let header = lines
        .by_ref()
        .map(|(_, line)| line.split_whitespace().collect::<Vec<_>>())
        .find(|tokens| REQUIRED_COLUMNS.iter().all(|column| tokens.contains(column)))
        .ok_or(FetchError::MissingHeader)?;
    let month_column = header.iter().position(|&column| column == "Month").unwrap_or(0);
    let header = csv::StringRecord::from(header);

    let mut records = Vec::new();
    for (line, content) in lines {
        let tokens = content.split_whitespace().collect::<Vec<_>>();
        let separator = |token: &&str| token.chars().all(|c| matches!(c, '-' | '=' | '+'));
        if tokens.is_empty() || tokens.iter().all(separator) {
            continue;
        }
        // banners and totals don't start with a month
        if tokens.get(month_column).map_or(true, |token| token.parse::<Month>().is_err()) {
            debug!("Skipping line {}: {}", line, content.trim());
            continue;
        }
        if tokens.len() != header.len() {
            return Err(FetchError::Malformed {
                line,
                reason: format!("expected {} columns, found {}", header.len(), tokens.len()),
            });
        }

        let row: UsageRow = csv::StringRecord::from(tokens)
            .deserialize(Some(&header))
            .map_err(|e| FetchError::Malformed { line, reason: e.to_string() })?;
        if project.map_or(false, |project| project != row.account) {
            continue;
        }

        let charged = parse_hours(&row.charged).ok_or_else(|| FetchError::Malformed {
            line,
            reason: format!("'{}' is not a duration", row.charged),
        })?;
        let restituted = parse_hours(&row.restituted).ok_or_else(|| FetchError::Malformed {
            line,
            reason: format!("'{}' is not a duration", row.restituted),
        })?;
        let username = row
            .user
            .as_deref()
            .or(user)
            .ok_or(FetchError::UnknownUser { line })?;

        records.push(UsageRecord::new(
            username,
            row.month,
            row.account,
            Usage::new(charged - restituted, restituted),
        ));
    }

    Ok(records)
}

/// Parses `H:MM:SS`, `D-H:MM:SS` or plain seconds into hours
///
/// Hours are rounded to the nearest [`Sbu`] step.
fn parse_hours(duration: &str) -> Option<Sbu> {
    let seconds = parse_seconds(duration)?;
    Sbu::checked_from_num(seconds as f64 / 3600.0)
}

fn parse_seconds(duration: &str) -> Option<i64> {
    fn digits(part: &str) -> Option<i64> {
        match !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
            true => part.parse().ok(),
            false => None,
        }
    }

    let (negative, duration) = match duration.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, duration),
    };
    let (days, clock) = match duration.split_once('-') {
        Some((days, clock)) => (digits(days)?, clock),
        None => (0, duration),
    };

    let seconds = match clock.split(':').collect::<Vec<_>>().as_slice() {
        [seconds] => digits(seconds)?,
        [hours, minutes, seconds] => {
            let (minutes, seconds) = (digits(minutes)?, digits(seconds)?);
            if minutes >= 60 || seconds >= 60 {
                return None;
            }
            digits(hours)?
                .checked_mul(3600)?
                .checked_add(minutes * 60 + seconds)?
        }
        _ => return None,
    };
    let seconds = days.checked_mul(86_400)?.checked_add(seconds)?;

    Some(if negative { -seconds } else { seconds })
}

/// Parses the member listing of the cluster account
///
/// Members follow a header line naming `User` and `Group` and the separator
/// line below it, the first word of each line is a username.
pub fn parse_members(text: &str) -> Result<Vec<String>, FetchError> {
    let mut lines = text.lines();
    lines
        .by_ref()
        .find(|line| line.contains("User") && line.contains("Group"))
        .ok_or(FetchError::MissingMembersHeader)?;
    lines.next();

    Ok(lines
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_owned)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_USER: &str = "\
Usage of user1 from 01-01-2019 to 01-03-2019

Month    Account  SBU's      Restituted
-------  -------  ---------  ----------
2019-01  proj1    100:00:00  0:00:00
2019-02  proj1    12:30:00   2:30:00
2019-02  other    1-00:00:00 0:00:00
Total             1-112:30:00 2:30:00
";

    fn hours(value: f64) -> Sbu {
        Sbu::from_num(value)
    }

    fn today() -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(2019, 6, 1).unwrap()
    }

    #[test]
    fn single_user_output() {
        let records = parse_usage(SINGLE_USER, Some("user1"), None).unwrap();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].username(), "user1");
        assert_eq!(records[0].month(), Month::new(2019, 1).unwrap());
        assert_eq!(records[0].account(), "proj1");
        assert_eq!(records[0].sbu(), hours(100.0));

        assert_eq!(records[1].sbu(), hours(10.0));
        assert_eq!(records[1].usage(), Usage::new(hours(10.0), hours(2.5)));

        assert_eq!(records[2].account(), "other");
        assert_eq!(records[2].sbu(), hours(24.0));
    }

    #[test]
    fn project_filter() {
        let records = parse_usage(SINGLE_USER, Some("user1"), Some("proj1")).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.account() == "proj1"));
    }

    #[test]
    fn user_column_overrides_queried_user() {
        let text = "\
Month   User   Account SBU's Restituted
2019-01 alice  acct1   360000 0
2019-01 carol  acct1   7200   0
";
        let records = parse_usage(text, None, None).unwrap();
        let users = records.iter().map(UsageRecord::username).collect::<Vec<_>>();
        assert_eq!(users, ["alice", "carol"]);
        assert_eq!(records[0].sbu(), hours(100.0));
        assert_eq!(records[1].sbu(), hours(2.0));
    }

    #[test]
    fn unattributed_lines() {
        let text = "Month Account SBU's Restituted\n2019-01 acct1 3600 0\n";
        assert!(matches!(
            parse_usage(text, None, None),
            Err(FetchError::UnknownUser { line: 2 })
        ));
    }

    #[test]
    fn missing_header() {
        assert!(matches!(
            parse_usage("accuse: no such user\n", Some("ghost"), None),
            Err(FetchError::MissingHeader)
        ));
    }

    #[test]
    fn malformed_duration() {
        let text = "Month Account SBU's Restituted\n2019-01 acct1 lots 0:00:00\n";
        match parse_usage(text, Some("alice"), None) {
            Err(FetchError::Malformed { line, reason }) => {
                assert_eq!(line, 2);
                assert!(reason.contains("lots"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn truncated_row() {
        let text = "\
Month   Account SBU's     Restituted
2019-01 acct1   100:00:00 0:00:00
2019-02 acct1   50:00:00
";
        match parse_usage(text, Some("alice"), None) {
            Err(FetchError::Malformed { line, reason }) => {
                assert_eq!(line, 3);
                assert!(reason.contains("columns"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn empty_table() {
        let text = "Month Account SBU's Restituted\n------- ------- ----- ----------\n";
        assert!(parse_usage(text, Some("alice"), None).unwrap().is_empty());
    }

    #[test]
    fn durations() {
        assert_eq!(parse_seconds("0:00:00"), Some(0));
        assert_eq!(parse_seconds("1:30:15"), Some(5415));
        assert_eq!(parse_seconds("250:00:00"), Some(900_000));
        assert_eq!(parse_seconds("2-01:00:00"), Some(176_400));
        assert_eq!(parse_seconds("42"), Some(42));
        assert_eq!(parse_seconds("-1:00:00"), Some(-3600));
        assert_eq!(parse_seconds("1:60:00"), None);
        assert_eq!(parse_seconds("1:00"), None);
        assert_eq!(parse_seconds(""), None);
        assert_eq!(parse_hours("1:30:00"), Some(hours(1.5)));
    }

    #[test]
    fn hours_round_to_nearest_step() {
        // 2 s is 4.55 steps of 1/8192 h
        assert_eq!(parse_hours("2").map(Sbu::to_bits), Some(5));
        assert_eq!(parse_hours("-2").map(Sbu::to_bits), Some(-5));
        assert_eq!(parse_hours("1").map(Sbu::to_bits), Some(2));
    }

    #[test]
    fn members() {
        let text = "\
Account: ncvul158
User      Group     Name
--------  --------  ---------
user1     ncvul158  Donald Duck
user2     ncvul158  Scrooge McDuck

";
        assert_eq!(parse_members(text).unwrap(), ["user1", "user2"]);
        assert!(parse_members("User Group Name\n---- ----- ----\n").unwrap().is_empty());
        assert!(matches!(
            parse_members("accinfo: permission denied\n"),
            Err(FetchError::MissingMembersHeader)
        ));
    }

    struct Canned(Vec<RawUsage>);

    impl AccountingSource for Canned {
        fn query(&self, _: &[&str], _: &DateRange) -> Result<Vec<RawUsage>, FetchError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn fetch_combines_queries() {
        let source = Canned(vec![
            RawUsage {
                user: Some("alice".to_owned()),
                text: "Month Account SBU's Restituted\n2019-01 acct1 1:00:00 0:00:00\n".to_owned(),
            },
            RawUsage {
                user: Some("bob".to_owned()),
                text: "Month Account SBU's Restituted\n2019-01 acct1 2:00:00 0:00:00\n".to_owned(),
            },
        ]);
        let range = DateRange::resolve(Some("2019"), Some("12-2019"), today()).unwrap();

        let records = fetch_usage(&source, &["alice", "bob"], &range, None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].username(), "bob");
        assert_eq!(records[1].sbu(), hours(2.0));
        assert_eq!(source.members().unwrap(), None);
    }

    #[test]
    fn recorded_output_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.txt");
        let text = "Month User Account SBU's Restituted\n2019-01 alice acct1 3600 0\n";
        std::fs::write(&path, text).unwrap();
        let range = DateRange::resolve(Some("2019"), None, today()).unwrap();

        let records = fetch_usage(&RecordedOutput::new(&path), &["alice"], &range, None).unwrap();
        let january = Month::new(2019, 1).unwrap();
        assert_eq!(
            records,
            [UsageRecord::new("alice", january, "acct1", Usage::new(hours(1.0), Sbu::ZERO))]
        );

        let missing = RecordedOutput::new(dir.path().join("missing.txt"));
        assert!(matches!(fetch_usage(&missing, &[], &range, None), Err(FetchError::Read { .. })));
    }

    #[test]
    fn failing_program() {
        let source = AccuseCommand::new(&AccountingConfig {
            usage_program: "/nonexistent/accuse".to_owned(),
            members_program: "/nonexistent/accinfo".to_owned(),
        });
        let range = DateRange::resolve(Some("2019"), None, today()).unwrap();
        assert!(matches!(source.query(&["alice"], &range), Err(FetchError::Spawn { .. })));
        assert!(matches!(source.members(), Err(FetchError::Spawn { .. })));
    }
}
