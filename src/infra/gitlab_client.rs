mod models;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT},
    Url,
};
use serde::de::DeserializeOwned;

use crate::{
    domain::{
        identity::{normalize_project_path, ItemKind},
        involvement::Viewer,
        models::{ApprovalState, ClosingIssue, IssueRecord, Note, RequestRecord},
        platform::Platform,
    },
    infra::http::{header_string, send_json, RateLimitHeaders},
    ports::{ListFilter, Page, PageCursor, PlatformPort, ProjectHandle},
};

use models::{GlApprovalState, GlClosedIssue, GlIssue, GlMergeRequest, GlNote, GlProject, GlUser};

pub const DEFAULT_GITLAB_BASE_URL: &str = "https://gitlab.com";
const PAGE_SIZE: &str = "100";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RATE_LIMIT: RateLimitHeaders = RateLimitHeaders {
    reset: "ratelimit-reset",
    remaining: None,
};

/// Adds `/api/v4` unless the URL already ends with it. Scheme and host are
/// required.
pub fn normalize_gitlab_base_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let raw = if raw.is_empty() {
        DEFAULT_GITLAB_BASE_URL
    } else {
        raw
    };

    let mut url =
        Url::parse(raw).with_context(|| format!("invalid GitLab base URL {raw:?}"))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(anyhow!(
            "invalid GitLab base URL {raw:?}: must include scheme and host"
        ));
    }

    let path = url.path().trim_end_matches('/').to_string();
    let path = if path.is_empty() {
        "/api/v4".to_string()
    } else if path.ends_with("/api/v4") {
        path
    } else {
        format!("{path}/api/v4")
    };
    url.set_path(&path);
    Ok(url.to_string())
}

#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
    base_url: String,
}

impl GitLabClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let base_url = normalize_gitlab_base_url(base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(crate::infra::http::USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            "private-token",
            HeaderValue::from_str(token.trim()).context("invalid GitLab token header")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to create GitLab API client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn project_url(&self, project: &ProjectHandle) -> String {
        let id = match project.id {
            Some(id) => id.to_string(),
            None => project.path.replace('/', "%2F"),
        };
        format!("{}/projects/{id}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, url: String) -> Result<T> {
        let response = send_json::<T>(operation, self.http.get(url), RATE_LIMIT).await?;
        Ok(response.body)
    }

    async fn get_page<T, R>(
        &self,
        operation: &str,
        url: String,
        query: &[(&str, String)],
        cursor: Option<PageCursor>,
    ) -> Result<Page<R>>
    where
        T: DeserializeOwned,
        R: From<T>,
    {
        let page = cursor.unwrap_or_else(|| "1".to_string());
        let request = self
            .http
            .get(url)
            .query(query)
            .query(&[("per_page", PAGE_SIZE), ("page", page.as_str())]);
        let response = send_json::<Vec<T>>(operation, request, RATE_LIMIT).await?;
        Ok(Page {
            items: response.body.into_iter().map(R::from).collect(),
            next: header_string(&response.headers, "x-next-page"),
        })
    }
}

fn updated_after_query(updated_after: DateTime<Utc>) -> Vec<(&'static str, String)> {
    vec![
        ("state", "all".to_string()),
        ("scope", "all".to_string()),
        ("order_by", "updated_at".to_string()),
        (
            "updated_after",
            updated_after.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    ]
}

#[async_trait]
impl PlatformPort for GitLabClient {
    fn platform(&self) -> Platform {
        Platform::GitLab
    }

    async fn current_user(&self) -> Result<Viewer> {
        let user: GlUser = self
            .get_json("GitLab current user", format!("{}/user", self.base_url))
            .await?;
        if user.username.trim().is_empty() {
            return Err(anyhow!("GitLab returned an empty username for the token"));
        }
        Ok(Viewer::new(user.username, user.id))
    }

    async fn resolve_project(&self, path: &str) -> Result<ProjectHandle> {
        let lookup = ProjectHandle {
            path: normalize_project_path(path),
            id: None,
        };
        let project: GlProject = self
            .get_json(
                &format!("GitLab project {}", lookup.path),
                self.project_url(&lookup),
            )
            .await?;
        Ok(ProjectHandle {
            path: normalize_project_path(&project.path_with_namespace),
            id: Some(project.id),
        })
    }

    async fn list_requests_page(
        &self,
        project: &ProjectHandle,
        filter: &ListFilter,
        cursor: Option<PageCursor>,
    ) -> Result<Page<RequestRecord>> {
        self.get_page::<GlMergeRequest, _>(
            &format!("GitLab merge requests of {}", project.path),
            format!("{}/merge_requests", self.project_url(project)),
            &updated_after_query(filter.updated_after),
            cursor,
        )
        .await
    }

    async fn list_issues_page(
        &self,
        project: &ProjectHandle,
        filter: &ListFilter,
        cursor: Option<PageCursor>,
    ) -> Result<Page<IssueRecord>> {
        self.get_page::<GlIssue, _>(
            &format!("GitLab issues of {}", project.path),
            format!("{}/issues", self.project_url(project)),
            &updated_after_query(filter.updated_after),
            cursor,
        )
        .await
    }

    async fn approval_state(&self, project: &ProjectHandle, number: u64) -> Result<ApprovalState> {
        let state: GlApprovalState = self
            .get_json(
                &format!("GitLab approval state of {}!{number}", project.path),
                format!(
                    "{}/merge_requests/{number}/approval_state",
                    self.project_url(project)
                ),
            )
            .await?;
        Ok(state.into())
    }

    async fn list_notes_page(
        &self,
        project: &ProjectHandle,
        kind: ItemKind,
        number: u64,
        cursor: Option<PageCursor>,
    ) -> Result<Page<Note>> {
        let (collection, marker) = match kind {
            ItemKind::Request => ("merge_requests", '!'),
            ItemKind::Issue => ("issues", '#'),
        };
        self.get_page::<GlNote, _>(
            &format!("GitLab notes of {}{marker}{number}", project.path),
            format!("{}/{collection}/{number}/notes", self.project_url(project)),
            &[
                ("sort", "asc".to_string()),
                ("order_by", "created_at".to_string()),
            ],
            cursor,
        )
        .await
    }

    async fn issues_closed_by_page(
        &self,
        project: &ProjectHandle,
        number: u64,
        cursor: Option<PageCursor>,
    ) -> Result<Page<ClosingIssue>> {
        self.get_page::<GlClosedIssue, _>(
            &format!("GitLab issues closed by {}!{number}", project.path),
            format!(
                "{}/merge_requests/{number}/closes_issues",
                self.project_url(project)
            ),
            &[],
            cursor,
        )
        .await
    }
}
