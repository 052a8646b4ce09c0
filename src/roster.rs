use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::Sbu;

/// Possible errors while loading a roster
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to read roster {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("The roster is not valid YAML or does not follow the roster schema: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("The user '{username}' is listed under both '{first}' and '{second}'")]
    DuplicateUser {
        username: String,
        first: String,
        second: String,
    },
    #[error("The project '{0}' contains an empty username")]
    EmptyUsername(String),
    #[error("The project '{project}' requests {quota} SBUs, quotas must be non-negative")]
    InvalidQuota { project: String, quota: f64 },
}

/// The members of a project as written in the YAML file
#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum RawMembers {
    /// `username: Full Name`
    Named(BTreeMap<String, Option<String>>),
    /// `[username, ...]`
    Plain(Vec<String>),
}

#[derive(Debug, serde::Deserialize)]
struct RawProject {
    description: Option<String>,
    #[serde(rename = "PI")]
    pi: Option<String>,
    #[serde(rename = "SBU requested", alias = "quota")]
    sbu_requested: Option<f64>,
    users: RawMembers,
}

/// A user listed in the roster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    username: String,
    name: Option<String>,
}

impl Member {
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The display name, falls back to the username
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.username)
    }
}

/// A billing group with its members and requested SBUs
#[derive(Clone, Debug, PartialEq)]
pub struct Project {
    name: String,
    description: Option<String>,
    pi: Option<String>,
    requested: Option<Sbu>,
    members: Vec<Member>,
}

impl Project {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The principal investigator
    pub fn pi(&self) -> Option<&str> {
        self.pi.as_deref()
    }

    /// The SBU quota, if one was requested
    pub fn requested(&self) -> Option<Sbu> {
        self.requested
    }

    /// Members, sorted by username
    pub fn members(&self) -> &[Member] {
        &self.members
    }
}

/// The mapping of projects to users loaded from YAML
///
/// Every username belongs to exactly one project. Projects are sorted by name.
#[derive(Clone, Debug, Default)]
pub struct Roster {
    projects: Vec<Project>,
    /// username -> (project index, member index)
    index: HashMap<String, (usize, usize)>,
}

impl Roster {
    /// Reads a roster file
    ///
    /// ```yaml
    /// A:
    ///     description: Example project
    ///     PI: Walt Disney
    ///     SBU requested: 1000
    ///     users:
    ///         user1: Donald Duck
    ///         user2: Scrooge McDuck
    /// ```
    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, SchemaError> {
        let raw: BTreeMap<String, RawProject> = serde_yaml::from_str(content)?;

        let mut projects = Vec::with_capacity(raw.len());
        for (name, project) in raw {
            let requested = match project.sbu_requested {
                Some(quota) => Some(
                    Sbu::checked_from_num(quota)
                        .filter(|sbu| *sbu >= Sbu::ZERO)
                        .ok_or_else(|| SchemaError::InvalidQuota { project: name.clone(), quota })?,
                ),
                None => None,
            };

            let mut members = match project.users {
                RawMembers::Named(users) => users
                    .into_iter()
                    .map(|(username, name)| Member { username, name })
                    .collect::<Vec<_>>(),
                RawMembers::Plain(users) => users
                    .into_iter()
                    .map(|username| Member { username, name: None })
                    .collect(),
            };
            members.sort_by(|a, b| a.username.cmp(&b.username));

            projects.push(Project {
                name,
                description: project.description,
                pi: project.pi,
                requested,
                members,
            });
        }

        Self::new(projects)
    }

    fn new(projects: Vec<Project>) -> Result<Self, SchemaError> {
        let mut index = HashMap::new();
        for (p, project) in projects.iter().enumerate() {
            for (m, member) in project.members.iter().enumerate() {
                if member.username.trim().is_empty() {
                    return Err(SchemaError::EmptyUsername(project.name.clone()));
                }
                if let Some((first, _)) = index.insert(member.username.clone(), (p, m)) {
                    return Err(SchemaError::DuplicateUser {
                        username: member.username.clone(),
                        first: projects[first].name.clone(),
                        second: project.name.clone(),
                    });
                }
            }
        }

        Ok(Self { projects, index })
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// All usernames, ordered by project and then by username
    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.projects
            .iter()
            .flat_map(|project| project.members.iter().map(Member::username))
    }

    /// The project and member entry of a user
    pub fn lookup(&self, username: &str) -> Option<(&Project, &Member)> {
        let &(p, m) = self.index.get(username)?;
        let project = &self.projects[p];
        Some((project, &project.members[m]))
    }

    pub fn contains(&self, username: &str) -> bool {
        self.index.contains_key(username)
    }

    /// The number of users
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
