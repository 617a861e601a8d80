use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::models::{
    ApprovalRule, ApprovalState, ClosingIssue, IssueModel, IssueRecord, ItemState, Note,
    RequestModel, RequestRecord, UserRef,
};

#[derive(Debug, Clone, Deserialize)]
pub(super) struct GlUser {
    pub(super) id: Option<u64>,
    #[serde(default)]
    pub(super) username: String,
}

impl From<GlUser> for UserRef {
    fn from(user: GlUser) -> Self {
        UserRef::new(user.username, user.id)
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct GlProject {
    pub(super) id: u64,
    pub(super) path_with_namespace: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct GlMergeRequest {
    pub(super) iid: u64,
    #[serde(default)]
    pub(super) title: String,
    pub(super) description: Option<String>,
    pub(super) state: String,
    pub(super) merged_at: Option<DateTime<Utc>>,
    pub(super) updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(super) web_url: String,
    pub(super) author: Option<GlUser>,
    pub(super) assignee: Option<GlUser>,
    #[serde(default)]
    pub(super) assignees: Vec<GlUser>,
    #[serde(default)]
    pub(super) reviewers: Vec<GlUser>,
}

impl From<GlMergeRequest> for RequestRecord {
    fn from(mr: GlMergeRequest) -> Self {
        let merged = mr.state.eq_ignore_ascii_case("merged") || mr.merged_at.is_some();
        let author = mr.author.map(UserRef::from);
        RequestRecord {
            project: None,
            model: RequestModel {
                number: mr.iid,
                title: mr.title,
                body: mr.description.unwrap_or_default(),
                state: ItemState::from_platform(&mr.state),
                merged,
                updated_at: mr.updated_at,
                web_url: mr.web_url,
                author: author
                    .as_ref()
                    .map(|user| user.username.clone())
                    .unwrap_or_default(),
            },
            author,
            assignee: mr.assignee.map(UserRef::from),
            assignees: mr.assignees.into_iter().map(UserRef::from).collect(),
            reviewers: mr.reviewers.into_iter().map(UserRef::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct GlIssue {
    pub(super) iid: u64,
    #[serde(default)]
    pub(super) title: String,
    pub(super) description: Option<String>,
    pub(super) state: String,
    pub(super) updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(super) web_url: String,
    pub(super) author: Option<GlUser>,
    pub(super) assignee: Option<GlUser>,
    #[serde(default)]
    pub(super) assignees: Vec<GlUser>,
}

impl From<GlIssue> for IssueRecord {
    fn from(issue: GlIssue) -> Self {
        let author = issue.author.map(UserRef::from);
        IssueRecord {
            project: None,
            model: IssueModel {
                number: issue.iid,
                title: issue.title,
                body: issue.description.unwrap_or_default(),
                state: ItemState::from_platform(&issue.state),
                updated_at: issue.updated_at,
                web_url: issue.web_url,
                author: author
                    .as_ref()
                    .map(|user| user.username.clone())
                    .unwrap_or_default(),
            },
            author,
            assignee: issue.assignee.map(UserRef::from),
            assignees: issue.assignees.into_iter().map(UserRef::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct GlNote {
    pub(super) id: u64,
    #[serde(default)]
    pub(super) body: String,
    pub(super) author: Option<GlUser>,
}

impl From<GlNote> for Note {
    fn from(note: GlNote) -> Self {
        Note {
            id: note.id,
            body: note.body,
            author: note.author.map(UserRef::from).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct GlApprovalState {
    #[serde(default)]
    pub(super) rules: Vec<GlApprovalRule>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GlApprovalRule {
    #[serde(default)]
    pub(super) name: String,
    #[serde(default)]
    pub(super) approved_by: Vec<GlUser>,
}

impl From<GlApprovalState> for ApprovalState {
    fn from(state: GlApprovalState) -> Self {
        ApprovalState {
            rules: state
                .rules
                .into_iter()
                .map(|rule| ApprovalRule {
                    name: rule.name,
                    approved_by: rule.approved_by.into_iter().map(UserRef::from).collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct GlClosedIssue {
    pub(super) iid: u64,
    pub(super) references: Option<GlReferences>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GlReferences {
    pub(super) full: Option<String>,
}

impl From<GlClosedIssue> for ClosingIssue {
    fn from(issue: GlClosedIssue) -> Self {
        ClosingIssue {
            number: issue.iid,
            full_reference: issue.references.and_then(|refs| refs.full),
        }
    }
}
