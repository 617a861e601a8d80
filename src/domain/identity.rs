use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Request,
    Issue,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "mr",
            Self::Issue => "issue",
        }
    }

    fn key_separator(&self) -> &'static str {
        match self {
            Self::Request => "#!",
            Self::Issue => "##",
        }
    }
}

impl Display for ItemKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trims whitespace and surrounding slashes and lower-cases, so every
/// spelling of one project path maps to the same identity.
pub fn normalize_project_path(raw: &str) -> String {
    raw.trim().trim_matches('/').trim().to_lowercase()
}

/// Splits `group/sub/repo` into (`group/sub`, `repo`). A path without a
/// slash is returned whole as the owner.
pub fn split_project_path(path: &str) -> (String, String) {
    let trimmed = path.trim().trim_matches('/');
    match trimmed.rsplit_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() => {
            (owner.to_string(), repo.to_string())
        }
        _ => (trimmed.to_string(), String::new()),
    }
}

pub fn join_project_path(owner: &str, repo: &str) -> String {
    let owner = owner.trim().trim_matches('/');
    let repo = repo.trim().trim_matches('/');
    match (owner.is_empty(), repo.is_empty()) {
        (_, true) => owner.to_string(),
        (true, false) => repo.to_string(),
        (false, false) => format!("{owner}/{repo}"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemIdentity {
    pub kind: ItemKind,
    pub project: String,
    pub number: u64,
}

impl ItemIdentity {
    pub fn new(kind: ItemKind, project: &str, number: u64) -> Self {
        Self {
            kind,
            project: normalize_project_path(project),
            number,
        }
    }

    pub fn request(project: &str, number: u64) -> Self {
        Self::new(ItemKind::Request, project, number)
    }

    pub fn issue(project: &str, number: u64) -> Self {
        Self::new(ItemKind::Issue, project, number)
    }

    /// `path#!N` for requests, `path##N` for issues.
    pub fn cache_key(&self) -> String {
        format!("{}{}{}", self.project, self.kind.key_separator(), self.number)
    }

    pub fn parse_cache_key(kind: ItemKind, key: &str) -> Option<Self> {
        let (project, number) = key.rsplit_once(kind.key_separator())?;
        if project.is_empty() {
            return None;
        }
        let number = parse_positive_number(number)?;
        Some(Self::new(kind, project, number))
    }
}

impl Display for ItemIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ItemKind::Request => write!(f, "{}!{}", self.project, self.number),
            ItemKind::Issue => write!(f, "{}#{}", self.project, self.number),
        }
    }
}

pub fn parse_positive_number(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}

pub fn note_key(project: &str, kind: ItemKind, number: u64, note_id: u64) -> String {
    format!("{}{note_id}", note_prefix(project, kind, number))
}

pub fn note_prefix(project: &str, kind: ItemKind, number: u64) -> String {
    format!(
        "{}|{}|{number}|",
        normalize_project_path(project),
        kind.as_str()
    )
}

/// Projects the user opted into. Empty means everything is allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedProjects {
    paths: BTreeSet<String>,
}

impl AllowedProjects {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths = paths
            .into_iter()
            .map(|path| normalize_project_path(path.as_ref()))
            .filter(|path| !path.is_empty())
            .collect();
        Self { paths }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn allows(&self, project: &str) -> bool {
        self.paths.is_empty() || self.paths.contains(&normalize_project_path(project))
    }

    /// Sorted, normalized and deduplicated.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }
}
