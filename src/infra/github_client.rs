mod models;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT},
    RequestBuilder,
};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::{
    domain::{
        identity::{normalize_project_path, ItemKind},
        involvement::Viewer,
        models::{ApprovalRule, ApprovalState, ClosingIssue, IssueRecord, Note, RequestRecord, UserRef},
        platform::Platform,
    },
    infra::http::{parse_next_link, send_json, RateLimitHeaders},
    ports::{ApiError, ListFilter, Page, PageCursor, PlatformPort, ProjectHandle},
};

use models::{
    GhClosingData, GhComment, GhGraphqlResponse, GhRepo, GhReview, GhSearchItem, GhSearchPage,
    GhUser,
};

pub const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";
const PAGE_SIZE: &str = "100";
const MAX_REVIEW_PAGES: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RATE_LIMIT: RateLimitHeaders = RateLimitHeaders {
    reset: "x-ratelimit-reset",
    remaining: Some("x-ratelimit-remaining"),
};
/// Pull request searches, in the order their results are kept. `involves:`
/// covers author, assignee, commenter and mentions, but not review requests
/// or reviews.
const REQUEST_SEARCHES: [&str; 3] = ["review-requested", "reviewed-by", "involves"];
const ISSUE_SEARCHES: [&str; 1] = ["involves"];
const ISSUE_COMMENTS_CURSOR: &str = "issue-comments|";
const REVIEW_COMMENTS_CURSOR: &str = "review-comments|";

const CLOSING_ISSUES_QUERY: &str = r#"
query($owner: String!, $name: String!, $number: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    pullRequest(number: $number) {
      closingIssuesReferences(first: 100, after: $after) {
        nodes { number repository { nameWithOwner } }
        pageInfo { hasNextPage endCursor }
      }
    }
  }
}
"#;

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
}

impl GitHubClient {
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        let api_base = match api_base.trim() {
            "" => DEFAULT_GITHUB_API_BASE,
            raw => raw,
        };

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(crate::infra::http::USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));
        let auth_header = format!("Bearer {}", token.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_header).context("invalid GitHub authorization header")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to create GitHub API client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// `https://api.github.com/graphql`, or `/api/graphql` on Enterprise
    /// installs whose REST base ends in `/api/v3`.
    fn graphql_url(&self) -> String {
        match self.api_base.strip_suffix("/v3") {
            Some(api_root) => format!("{api_root}/graphql"),
            None => format!("{}/graphql", self.api_base),
        }
    }

    fn repo_url(&self, project: &ProjectHandle) -> String {
        format!("{}/repos/{}", self.api_base, project.path)
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, url: String) -> Result<T> {
        let response = send_json::<T>(operation, self.http.get(url), RATE_LIMIT).await?;
        Ok(response.body)
    }

    /// First page from `first`, later pages straight from the `Link` cursor.
    async fn get_linked_page<T: DeserializeOwned>(
        &self,
        operation: &str,
        first: impl FnOnce() -> RequestBuilder,
        cursor: Option<PageCursor>,
    ) -> Result<(Vec<T>, Option<String>)> {
        let request = match cursor {
            Some(url) => self.http.get(url),
            None => first(),
        };
        let response = send_json::<Vec<T>>(operation, request, RATE_LIMIT).await?;
        let next = parse_next_link(&response.headers);
        Ok((response.body, next))
    }

    /// One page of the `/search/issues` walk over `searches`. The cursor
    /// carries the index of the running search and its next page URL; an
    /// empty URL starts that search from its first page.
    async fn search_page(
        &self,
        item_type: &str,
        searches: &[&'static str],
        project: &ProjectHandle,
        filter: &ListFilter,
        cursor: Option<PageCursor>,
    ) -> Result<(Vec<GhSearchItem>, &'static str, Option<PageCursor>)> {
        let (stage, page_url) = match cursor.as_deref() {
            None => (0, None),
            Some(raw) => parse_search_cursor(raw, searches.len())?,
        };
        let qualifier = searches[stage];
        let operation = if project.is_unscoped() {
            format!("GitHub {item_type} search ({qualifier})")
        } else {
            format!("GitHub {item_type} search ({qualifier}) in {}", project.path)
        };

        let request = match page_url {
            Some(url) => self.http.get(url),
            None => {
                let query = search_query(item_type, qualifier, project, filter)?;
                self.http
                    .get(format!("{}/search/issues", self.api_base))
                    .query(&[
                        ("q", query.as_str()),
                        ("sort", "updated"),
                        ("order", "desc"),
                        ("per_page", PAGE_SIZE),
                    ])
            }
        };
        let response = send_json::<GhSearchPage>(&operation, request, RATE_LIMIT).await?;

        let next = match parse_next_link(&response.headers) {
            Some(url) => Some(format!("{stage}|{url}")),
            None if stage + 1 < searches.len() => Some(format!("{}|", stage + 1)),
            None => None,
        };
        Ok((response.body.items, qualifier, next))
    }
}

/// `is:pr involves:alice repo:acme/api updated:>=2025-05-01`. The repo
/// term is left out for an unscoped listing.
fn search_query(
    item_type: &str,
    qualifier: &str,
    project: &ProjectHandle,
    filter: &ListFilter,
) -> Result<String> {
    let login = filter.involves.trim();
    if login.is_empty() {
        return Err(anyhow!("GitHub search needs the viewer's login"));
    }
    let mut terms = vec![format!("is:{item_type}"), format!("{qualifier}:{login}")];
    if !project.is_unscoped() {
        terms.push(format!("repo:{}", project.path));
    }
    terms.push(format!("updated:>={}", filter.updated_after.format("%Y-%m-%d")));
    Ok(terms.join(" "))
}

fn parse_search_cursor(raw: &str, searches: usize) -> Result<(usize, Option<&str>)> {
    let parsed = raw
        .split_once('|')
        .and_then(|(stage, url)| Some((stage.parse::<usize>().ok()?, url)));
    match parsed {
        Some((stage, url)) if stage < searches => Ok((stage, (!url.is_empty()).then_some(url))),
        _ => Err(anyhow!("unrecognized GitHub search cursor: {raw}")),
    }
}

fn split_repo(path: &str) -> Result<(&str, &str)> {
    match path.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => Err(anyhow!(
            "repository '{path}' is invalid; expected owner/repo format"
        )),
    }
}

#[async_trait]
impl PlatformPort for GitHubClient {
    fn platform(&self) -> Platform {
        Platform::GitHub
    }

    async fn current_user(&self) -> Result<Viewer> {
        let user: GhUser = self
            .get_json("GitHub current user", format!("{}/user", self.api_base))
            .await?;
        if user.login.trim().is_empty() {
            return Err(anyhow!("GitHub returned an empty login for the token"));
        }
        Ok(Viewer::new(user.login, user.id))
    }

    async fn resolve_project(&self, path: &str) -> Result<ProjectHandle> {
        let path = normalize_project_path(path);
        split_repo(&path)?;
        let repo: GhRepo = self
            .get_json(
                &format!("GitHub repository {path}"),
                format!("{}/repos/{path}", self.api_base),
            )
            .await?;
        Ok(ProjectHandle {
            path: normalize_project_path(&repo.full_name),
            id: Some(repo.id),
        })
    }

    fn searches_involvement(&self) -> bool {
        true
    }

    async fn list_requests_page(
        &self,
        project: &ProjectHandle,
        filter: &ListFilter,
        cursor: Option<PageCursor>,
    ) -> Result<Page<RequestRecord>> {
        let (items, qualifier, next) = self
            .search_page("pr", &REQUEST_SEARCHES, project, filter, cursor)
            .await?;
        let requested_reviewer = (qualifier == "review-requested").then(|| filter.involves.trim());
        Ok(Page {
            items: items
                .into_iter()
                .filter(GhSearchItem::is_pull_request)
                .map(|item| item.into_request(requested_reviewer))
                .collect(),
            next,
        })
    }

    async fn list_issues_page(
        &self,
        project: &ProjectHandle,
        filter: &ListFilter,
        cursor: Option<PageCursor>,
    ) -> Result<Page<IssueRecord>> {
        let (items, _, next) = self
            .search_page("issue", &ISSUE_SEARCHES, project, filter, cursor)
            .await?;
        Ok(Page {
            items: items
                .into_iter()
                .filter(|item| !item.is_pull_request())
                .map(GhSearchItem::into_issue)
                .collect(),
            next,
        })
    }

    /// Anyone with a submitted review counts as an approver.
    async fn approval_state(&self, project: &ProjectHandle, number: u64) -> Result<ApprovalState> {
        let operation = format!("GitHub reviews of {}#{number}", project.path);
        let mut reviewers: Vec<UserRef> = Vec::new();
        let mut cursor: Option<PageCursor> = None;

        for _ in 0..MAX_REVIEW_PAGES {
            let (reviews, next) = self
                .get_linked_page::<GhReview>(
                    &operation,
                    || {
                        self.http
                            .get(format!("{}/pulls/{number}/reviews", self.repo_url(project)))
                            .query(&[("per_page", PAGE_SIZE)])
                    },
                    cursor.take(),
                )
                .await?;
            reviewers.extend(
                reviews
                    .into_iter()
                    .filter(|review| !review.state.eq_ignore_ascii_case("PENDING"))
                    .filter_map(|review| review.user.map(UserRef::from)),
            );
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(ApprovalState {
            rules: vec![ApprovalRule {
                name: "reviews".to_string(),
                approved_by: reviewers,
            }],
        })
    }

    /// Issue comments first, then (for pull requests) review comments.
    async fn list_notes_page(
        &self,
        project: &ProjectHandle,
        kind: ItemKind,
        number: u64,
        cursor: Option<PageCursor>,
    ) -> Result<Page<Note>> {
        let issue_comments_url = format!(
            "{}/issues/{number}/comments?per_page={PAGE_SIZE}",
            self.repo_url(project)
        );
        let review_comments_url = format!(
            "{}/pulls/{number}/comments?per_page={PAGE_SIZE}",
            self.repo_url(project)
        );

        let (url, reviews_stage) = match cursor.as_deref() {
            None => (issue_comments_url, false),
            Some(raw) => {
                if let Some(url) = raw.strip_prefix(ISSUE_COMMENTS_CURSOR) {
                    (url.to_string(), false)
                } else if let Some(url) = raw.strip_prefix(REVIEW_COMMENTS_CURSOR) {
                    (url.to_string(), true)
                } else {
                    return Err(anyhow!("unrecognized GitHub notes cursor: {raw}"));
                }
            }
        };

        let operation = format!("GitHub comments of {}#{number}", project.path);
        let (comments, next) = self
            .get_linked_page::<GhComment>(&operation, || self.http.get(&url), None)
            .await?;

        let next = match (next, reviews_stage) {
            (Some(next), false) => Some(format!("{ISSUE_COMMENTS_CURSOR}{next}")),
            (Some(next), true) => Some(format!("{REVIEW_COMMENTS_CURSOR}{next}")),
            (None, false) if kind == ItemKind::Request => {
                Some(format!("{REVIEW_COMMENTS_CURSOR}{review_comments_url}"))
            }
            (None, _) => None,
        };

        Ok(Page {
            items: comments.into_iter().map(Note::from).collect(),
            next,
        })
    }

    async fn issues_closed_by_page(
        &self,
        project: &ProjectHandle,
        number: u64,
        cursor: Option<PageCursor>,
    ) -> Result<Page<ClosingIssue>> {
        let operation = format!("GitHub issues closed by {}#{number}", project.path);
        let (owner, name) = split_repo(&project.path)?;
        let payload = json!({
            "query": CLOSING_ISSUES_QUERY,
            "variables": {
                "owner": owner,
                "name": name,
                "number": number,
                "after": cursor,
            },
        });

        let response = send_json::<GhGraphqlResponse<GhClosingData>>(
            &operation,
            self.http.post(self.graphql_url()).json(&payload),
            RATE_LIMIT,
        )
        .await?;
        let body = response.body;

        if let Some(first) = body.errors.first() {
            return Err(ApiError::Payload {
                operation,
                message: first.message.clone(),
            }
            .into());
        }
        let Some(connection) = body
            .data
            .and_then(|data| data.repository)
            .and_then(|repo| repo.pull_request)
            .map(|pr| pr.closing_issues_references)
        else {
            return Err(ApiError::Payload {
                operation,
                message: "pull request not found".to_string(),
            }
            .into());
        };

        let next = if connection.page_info.has_next_page {
            connection.page_info.end_cursor
        } else {
            None
        };
        Ok(Page {
            items: connection
                .nodes
                .into_iter()
                .map(ClosingIssue::from)
                .collect(),
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn graphql_endpoint_follows_api_base() {
        let public = GitHubClient::new("", "t").unwrap();
        assert_eq!(public.graphql_url(), "https://api.github.com/graphql");
        let enterprise = GitHubClient::new("https://ghe.example/api/v3/", "t").unwrap();
        assert_eq!(enterprise.graphql_url(), "https://ghe.example/api/graphql");
    }

    #[test]
    fn search_query_scopes_to_the_viewer_and_repository() {
        let filter = ListFilter {
            updated_after: Utc.with_ymd_and_hms(2025, 5, 1, 13, 30, 0).unwrap(),
            involves: " alice ".to_string(),
        };
        let project = ProjectHandle {
            path: "acme/api".to_string(),
            id: Some(1),
        };
        assert_eq!(
            search_query("pr", "involves", &project, &filter).unwrap(),
            "is:pr involves:alice repo:acme/api updated:>=2025-05-01"
        );
        assert_eq!(
            search_query("issue", "involves", &ProjectHandle::unscoped(), &filter).unwrap(),
            "is:issue involves:alice updated:>=2025-05-01"
        );

        let nobody = ListFilter {
            involves: String::new(),
            ..filter
        };
        assert!(search_query("pr", "involves", &project, &nobody).is_err());
    }

    #[test]
    fn search_cursor_names_a_known_search() {
        assert_eq!(parse_search_cursor("1|", 3).unwrap(), (1, None));
        assert_eq!(
            parse_search_cursor("2|https://api.github.com/search/issues?page=2", 3).unwrap(),
            (2, Some("https://api.github.com/search/issues?page=2"))
        );
        assert!(parse_search_cursor("3|", 3).is_err());
        assert!(parse_search_cursor("https://api.github.com/x", 3).is_err());
    }

    #[test]
    fn repositories_must_be_owner_and_name() {
        assert_eq!(split_repo("acme/api").unwrap(), ("acme", "api"));
        assert!(split_repo("acme").is_err());
        assert!(split_repo("acme/api/extra").is_err());
    }
}
