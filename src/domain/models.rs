use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::identity::ItemKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Open,
    Closed,
}

impl ItemState {
    /// GitLab reports `opened`/`closed`/`merged`/`locked`, GitHub `open`/`closed`.
    pub fn from_platform(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" | "opened" => Self::Open,
            _ => Self::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestModel {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: ItemState,
    #[serde(default)]
    pub merged: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub web_url: String,
    #[serde(default)]
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueModel {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: ItemState,
    pub updated_at: Option<DateTime<Utc>>,
    pub web_url: String,
    #[serde(default)]
    pub author: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub username: String,
    pub id: Option<u64>,
}

impl UserRef {
    pub fn new(username: impl Into<String>, id: Option<u64>) -> Self {
        Self {
            username: username.into(),
            id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: u64,
    pub body: String,
    pub author: UserRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub project_path: String,
    pub item_kind: ItemKind,
    pub item_number: u64,
    pub note_id: u64,
    pub body: String,
    pub author_username: String,
    pub author_id: Option<u64>,
}

impl NoteRecord {
    pub fn from_note(project_path: &str, item_kind: ItemKind, item_number: u64, note: &Note) -> Self {
        Self {
            project_path: project_path.to_string(),
            item_kind,
            item_number,
            note_id: note.id,
            body: note.body.clone(),
            author_username: note.author.username.clone(),
            author_id: note.author.id,
        }
    }

    pub fn into_note(self) -> Note {
        Note {
            id: self.note_id,
            body: self.body,
            author: UserRef::new(self.author_username, self.author_id),
        }
    }
}

/// A listed request plus the people attached to it, as the platform reported them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// Set when the listing spans projects and names the item's own.
    pub project: Option<String>,
    pub model: RequestModel,
    pub author: Option<UserRef>,
    pub assignee: Option<UserRef>,
    pub assignees: Vec<UserRef>,
    pub reviewers: Vec<UserRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRecord {
    pub project: Option<String>,
    pub model: IssueModel,
    pub author: Option<UserRef>,
    pub assignee: Option<UserRef>,
    pub assignees: Vec<UserRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalRule {
    pub name: String,
    pub approved_by: Vec<UserRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalState {
    pub rules: Vec<ApprovalRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosingIssue {
    pub number: u64,
    /// `group/repo#N` when the platform reports one.
    pub full_reference: Option<String>,
}

/// Items without an update time, or updated before the cutoff, are dropped.
pub fn within_cutoff(updated_at: Option<DateTime<Utc>>, cutoff: DateTime<Utc>) -> bool {
    matches!(updated_at, Some(at) if at >= cutoff)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn platform_states_collapse_to_open_or_closed() {
        assert_eq!(ItemState::from_platform("opened"), ItemState::Open);
        assert_eq!(ItemState::from_platform("OPEN"), ItemState::Open);
        assert_eq!(ItemState::from_platform("merged"), ItemState::Closed);
        assert_eq!(ItemState::from_platform("locked"), ItemState::Closed);
    }

    #[test]
    fn cutoff_keeps_boundary_and_drops_missing_times() {
        let cutoff = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        assert!(within_cutoff(Some(cutoff), cutoff));
        assert!(!within_cutoff(
            Some(cutoff - chrono::Duration::seconds(1)),
            cutoff
        ));
        assert!(!within_cutoff(None, cutoff));
    }
}
