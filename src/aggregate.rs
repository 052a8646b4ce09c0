use std::collections::HashMap;

use crate::{Metric, Month, ReportConfig, Roster, Sbu, UsageTable};

/// The SBU usage of a project, or of all projects combined
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectUsage {
    name: String,
    pi: Option<String>,
    requested: Option<Sbu>,
    monthly: Vec<Sbu>,
    active: Vec<String>,
}

impl ProjectUsage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pi(&self) -> Option<&str> {
        self.pi.as_deref()
    }

    pub fn requested(&self) -> Option<Sbu> {
        self.requested
    }

    /// Net SBUs per month of the report
    pub fn monthly(&self) -> &[Sbu] {
        &self.monthly
    }

    pub fn total(&self) -> Sbu {
        self.monthly.iter().copied().sum()
    }

    /// Running sum over the months
    pub fn accumulated(&self) -> Vec<Sbu> {
        self.monthly
            .iter()
            .scan(Sbu::ZERO, |sum, &sbu| {
                *sum += sbu;
                Some(*sum)
            })
            .collect()
    }

    /// The share of the requested SBUs used, in percent
    ///
    /// `None` when no quota was requested or the quota is zero.
    pub fn percentage(&self) -> Option<f64> {
        percentage(self.total(), self.requested)
    }

    /// [`ProjectUsage::percentage`] of the running sum, per month
    pub fn accumulated_percentage(&self) -> Vec<Option<f64>> {
        self.accumulated()
            .into_iter()
            .map(|sbu| percentage(sbu, self.requested))
            .collect()
    }

    /// Display names of the active members
    pub fn active(&self) -> &[String] {
        &self.active
    }
}

/// `used / quota * 100`, rounded to two decimals
pub fn percentage(used: Sbu, quota: Option<Sbu>) -> Option<f64> {
    let quota = quota.filter(|quota| *quota > Sbu::ZERO)?;
    let percent = used.to_num::<f64>() * 100.0 / quota.to_num::<f64>();
    Some((percent * 100.0).round() / 100.0)
}

/// Usage per roster project plus a grand total
///
/// A read-only view derived from a [`UsageTable`], build a new one instead of
/// changing it.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateReport {
    months: Vec<Month>,
    projects: Vec<ProjectUsage>,
    total: ProjectUsage,
}

impl AggregateReport {
    /// Groups the table rows by their roster project
    pub fn new(roster: &Roster, table: &UsageTable, config: &ReportConfig) -> Self {
        let months = table.months().to_vec();
        let mut projects = roster
            .projects()
            .iter()
            .map(|project| ProjectUsage {
                name: project.name().to_owned(),
                pi: project.pi().map(str::to_owned),
                requested: project.requested(),
                monthly: vec![Sbu::ZERO; months.len()],
                active: Vec::new(),
            })
            .collect::<Vec<_>>();
        let index = projects
            .iter()
            .enumerate()
            .map(|(i, project)| (project.name.clone(), i))
            .collect::<HashMap<_, _>>();

        let mut grand = vec![Sbu::ZERO; months.len()];
        for row in table.rows() {
            for (sum, sbu) in grand.iter_mut().zip(row.monthly(Metric::Sbu)) {
                *sum += sbu;
            }

            let project = match index.get(row.project()) {
                Some(&project) => &mut projects[project],
                None => continue,
            };
            for (sum, sbu) in project.monthly.iter_mut().zip(row.monthly(Metric::Sbu)) {
                *sum += sbu;
            }
            if row.is_active() {
                project.active.push(row.name().to_owned());
            }
        }

        let requested = projects
            .iter()
            .filter_map(ProjectUsage::requested)
            .fold(None, |sum: Option<Sbu>, quota| Some(sum.unwrap_or(Sbu::ZERO) + quota));
        let total = ProjectUsage {
            name: config.labels.sum.clone(),
            pi: None,
            requested,
            monthly: grand,
            active: Vec::new(),
        };

        Self { months, projects, total }
    }

    pub fn months(&self) -> &[Month] {
        &self.months
    }

    /// One entry per roster project, ordered by name
    pub fn projects(&self) -> &[ProjectUsage] {
        &self.projects
    }

    pub fn project(&self, name: &str) -> Option<&ProjectUsage> {
        self.projects.iter().find(|project| project.name == name)
    }

    /// All users combined, the quota is the sum of all requested quotas
    pub fn grand_total(&self) -> &ProjectUsage {
        &self.total
    }
}
