use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    identity::{join_project_path, split_project_path, ItemIdentity},
    label::Label,
    models::{IssueModel, RequestModel},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueActivity {
    pub label: Label,
    pub owner: String,
    pub repo: String,
    pub model: IssueModel,
    pub updated_at: Option<DateTime<Utc>>,
    pub has_updates: bool,
}

impl IssueActivity {
    pub fn new(project_path: &str, model: IssueModel, label: Label) -> Self {
        let (owner, repo) = split_project_path(project_path);
        Self {
            label,
            owner,
            repo,
            updated_at: model.updated_at,
            model,
            has_updates: false,
        }
    }

    pub fn project_path(&self) -> String {
        join_project_path(&self.owner, &self.repo)
    }

    pub fn identity(&self) -> ItemIdentity {
        ItemIdentity::issue(&self.project_path(), self.model.number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestActivity {
    pub label: Label,
    pub owner: String,
    pub repo: String,
    pub model: RequestModel,
    pub updated_at: Option<DateTime<Utc>>,
    pub has_updates: bool,
    /// Linked issues, newest update first.
    pub issues: Vec<IssueActivity>,
}

impl RequestActivity {
    pub fn new(project_path: &str, model: RequestModel, label: Label) -> Self {
        let (owner, repo) = split_project_path(project_path);
        Self {
            label,
            owner,
            repo,
            updated_at: model.updated_at,
            model,
            has_updates: false,
            issues: Vec::new(),
        }
    }

    pub fn project_path(&self) -> String {
        join_project_path(&self.owner, &self.repo)
    }

    pub fn identity(&self) -> ItemIdentity {
        ItemIdentity::request(&self.project_path(), self.model.number)
    }
}

/// What a fetch returns: requests with nested issues, and the issues
/// that no request links to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivityCollections {
    pub requests: Vec<RequestActivity>,
    pub issues: Vec<IssueActivity>,
}

impl ActivityCollections {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.issues.is_empty()
    }
}
