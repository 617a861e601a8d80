use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::{
    identity::normalize_project_path,
    models::{
        ClosingIssue, IssueModel, IssueRecord, ItemState, Note, RequestModel, RequestRecord,
        UserRef,
    },
};

#[derive(Debug, Clone, Deserialize)]
pub(super) struct GhUser {
    pub(super) login: String,
    pub(super) id: Option<u64>,
}

impl From<GhUser> for UserRef {
    fn from(user: GhUser) -> Self {
        UserRef::new(user.login, user.id)
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct GhRepo {
    pub(super) id: u64,
    pub(super) full_name: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct GhSearchPage {
    #[serde(default)]
    pub(super) items: Vec<GhSearchItem>,
}

/// Issues and pull requests share one search result shape; pull requests
/// carry a `pull_request` object.
#[derive(Debug, Deserialize)]
pub(super) struct GhSearchItem {
    pub(super) number: u64,
    #[serde(default)]
    pub(super) title: String,
    pub(super) body: Option<String>,
    pub(super) state: String,
    pub(super) html_url: String,
    pub(super) updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(super) repository_url: String,
    pub(super) user: Option<GhUser>,
    pub(super) assignee: Option<GhUser>,
    #[serde(default)]
    pub(super) assignees: Vec<GhUser>,
    pub(super) pull_request: Option<GhSearchPullRequest>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GhSearchPullRequest {
    pub(super) merged_at: Option<DateTime<Utc>>,
}

impl GhSearchItem {
    pub(super) fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    /// `owner/repo`, taken from `.../repos/{owner}/{repo}`.
    fn repository(&self) -> Option<String> {
        let (_, path) = self.repository_url.rsplit_once("/repos/")?;
        let path = normalize_project_path(path);
        (!path.is_empty()).then_some(path)
    }

    /// `requested_reviewer` is set for results of a `review-requested:` search,
    /// whose items do not list their reviewers.
    pub(super) fn into_request(self, requested_reviewer: Option<&str>) -> RequestRecord {
        let project = self.repository();
        let author = self.user.map(UserRef::from);
        RequestRecord {
            project,
            model: RequestModel {
                number: self.number,
                title: self.title,
                body: self.body.unwrap_or_default(),
                state: ItemState::from_platform(&self.state),
                merged: self
                    .pull_request
                    .is_some_and(|pr| pr.merged_at.is_some()),
                updated_at: self.updated_at,
                web_url: self.html_url,
                author: author
                    .as_ref()
                    .map(|user| user.username.clone())
                    .unwrap_or_default(),
            },
            author,
            assignee: self.assignee.map(UserRef::from),
            assignees: self.assignees.into_iter().map(UserRef::from).collect(),
            reviewers: requested_reviewer
                .map(|login| vec![UserRef::new(login, None)])
                .unwrap_or_default(),
        }
    }

    pub(super) fn into_issue(self) -> IssueRecord {
        let project = self.repository();
        let author = self.user.map(UserRef::from);
        IssueRecord {
            project,
            model: IssueModel {
                number: self.number,
                title: self.title,
                body: self.body.unwrap_or_default(),
                state: ItemState::from_platform(&self.state),
                updated_at: self.updated_at,
                web_url: self.html_url,
                author: author
                    .as_ref()
                    .map(|user| user.username.clone())
                    .unwrap_or_default(),
            },
            author,
            assignee: self.assignee.map(UserRef::from),
            assignees: self.assignees.into_iter().map(UserRef::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct GhComment {
    pub(super) id: u64,
    pub(super) body: Option<String>,
    pub(super) user: Option<GhUser>,
}

impl From<GhComment> for Note {
    fn from(comment: GhComment) -> Self {
        Note {
            id: comment.id,
            body: comment.body.unwrap_or_default(),
            author: comment.user.map(UserRef::from).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct GhReview {
    pub(super) user: Option<GhUser>,
    #[serde(default)]
    pub(super) state: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct GhGraphqlResponse<T> {
    pub(super) data: Option<T>,
    #[serde(default)]
    pub(super) errors: Vec<GhGraphqlError>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GhGraphqlError {
    pub(super) message: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct GhClosingData {
    pub(super) repository: Option<GhClosingRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GhClosingRepository {
    pub(super) pull_request: Option<GhClosingPullRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GhClosingPullRequest {
    pub(super) closing_issues_references: GhClosingConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GhClosingConnection {
    #[serde(default)]
    pub(super) nodes: Vec<GhClosingIssueNode>,
    pub(super) page_info: GhPageInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GhPageInfo {
    pub(super) has_next_page: bool,
    pub(super) end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GhClosingIssueNode {
    pub(super) number: u64,
    pub(super) repository: Option<GhNameWithOwner>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GhNameWithOwner {
    pub(super) name_with_owner: String,
}

impl From<GhClosingIssueNode> for ClosingIssue {
    fn from(node: GhClosingIssueNode) -> Self {
        ClosingIssue {
            number: node.number,
            full_reference: node
                .repository
                .map(|repo| format!("{}#{}", repo.name_with_owner, node.number)),
        }
    }
}
