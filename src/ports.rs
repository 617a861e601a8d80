use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{
    identity::ItemKind,
    involvement::Viewer,
    models::{ApprovalState, ClosingIssue, IssueRecord, Note, RequestRecord},
    platform::Platform,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectHandle {
    /// Normalized `group/sub/repo` path. Empty for [`ProjectHandle::unscoped`].
    pub path: String,
    pub id: Option<u64>,
}

impl ProjectHandle {
    /// Listing scope that spans every project the viewer can see. Only
    /// platforms that report `searches_involvement` accept it.
    pub fn unscoped() -> Self {
        Self {
            path: String::new(),
            id: None,
        }
    }

    pub fn is_unscoped(&self) -> bool {
        self.path.is_empty()
    }
}

/// Narrows a request or issue listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilter {
    pub updated_after: DateTime<Utc>,
    /// Username of the viewer. Platforms with an involvement search list
    /// only items that involve this user.
    pub involves: String,
}

pub type PageCursor = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<PageCursor>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Read-only capabilities of one hosting platform. Every list call returns a
/// single page; `cursor` is `None` for the first page.
#[async_trait]
pub trait PlatformPort: Send + Sync {
    fn platform(&self) -> Platform;

    async fn current_user(&self) -> Result<Viewer>;

    async fn resolve_project(&self, path: &str) -> Result<ProjectHandle>;

    /// True when listings are already narrowed to the viewer's involvement,
    /// so an unscoped listing without an allowed project set makes sense.
    fn searches_involvement(&self) -> bool {
        false
    }

    async fn list_requests_page(
        &self,
        project: &ProjectHandle,
        filter: &ListFilter,
        cursor: Option<PageCursor>,
    ) -> Result<Page<RequestRecord>>;

    async fn list_issues_page(
        &self,
        project: &ProjectHandle,
        filter: &ListFilter,
        cursor: Option<PageCursor>,
    ) -> Result<Page<IssueRecord>>;

    async fn approval_state(&self, project: &ProjectHandle, number: u64) -> Result<ApprovalState>;

    async fn list_notes_page(
        &self,
        project: &ProjectHandle,
        kind: ItemKind,
        number: u64,
        cursor: Option<PageCursor>,
    ) -> Result<Page<Note>>;

    async fn issues_closed_by_page(
        &self,
        project: &ProjectHandle,
        number: u64,
        cursor: Option<PageCursor>,
    ) -> Result<Page<ClosingIssue>>;
}

/// Flat key/value buckets. Keys within a bucket are unique; `put` replaces.
pub trait BlobStorePort: Send + Sync {
    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()>;
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;
    /// Entries whose key starts with `prefix`, ordered by key.
    fn scan_prefix(&self, bucket: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}

pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Failures reported by platform clients that callers branch on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("{operation}: HTTP {status}: {message}")]
    Status {
        operation: String,
        status: u16,
        retry_after: Option<String>,
        rate_limit_reset: Option<String>,
        message: String,
    },
    #[error("{operation}: unusable response: {message}")]
    Payload { operation: String, message: String },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Payload { .. } => None,
        }
    }
}
