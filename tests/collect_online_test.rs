use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use activity_feed::{
    app::{
        cache::ActivityCache,
        collect::collect_online,
        context::FetchContext,
        offline::load_cached,
        retry::{RetryPolicy, RetrySettings},
    },
    domain::{
        identity::{AllowedProjects, ItemIdentity, ItemKind},
        involvement::Viewer,
        label::Label,
        models::{
            ApprovalRule, ApprovalState, ClosingIssue, IssueModel, IssueRecord, ItemState, Note,
            RequestModel, RequestRecord, UserRef,
        },
        platform::Platform,
    },
    infra::blob_sqlite::SqliteBlobStore,
    ports::{ApiError, ClockPort, ListFilter, Page, PageCursor, PlatformPort, ProjectHandle},
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

type ItemKey = (String, u64);

#[derive(Clone, Default)]
struct FakePlatform {
    request_pages: Arc<Mutex<HashMap<String, Vec<Vec<RequestRecord>>>>>,
    issue_pages: Arc<Mutex<HashMap<String, Vec<Vec<IssueRecord>>>>>,
    approvals: Arc<Mutex<HashMap<ItemKey, ApprovalState>>>,
    failing_approvals: Arc<Mutex<Vec<ItemKey>>>,
    notes: Arc<Mutex<HashMap<(String, ItemKind, u64), Vec<Note>>>>,
    closing: Arc<Mutex<HashMap<ItemKey, Vec<ClosingIssue>>>>,
    calls: Arc<Mutex<Vec<String>>>,
    filters: Arc<Mutex<Vec<ListFilter>>>,
    searches_involvement: bool,
}

impl FakePlatform {
    fn set_requests(&self, project: &str, pages: Vec<Vec<RequestRecord>>) {
        self.request_pages
            .lock()
            .unwrap()
            .insert(project.to_string(), pages);
    }

    fn set_issues(&self, project: &str, pages: Vec<Vec<IssueRecord>>) {
        self.issue_pages
            .lock()
            .unwrap()
            .insert(project.to_string(), pages);
    }

    fn approve(&self, project: &str, number: u64, by: &str) {
        self.approvals.lock().unwrap().insert(
            (project.to_string(), number),
            ApprovalState {
                rules: vec![ApprovalRule {
                    name: "default".to_string(),
                    approved_by: vec![UserRef::new(by, None)],
                }],
            },
        );
    }

    fn fail_approval(&self, project: &str, number: u64) {
        self.failing_approvals
            .lock()
            .unwrap()
            .push((project.to_string(), number));
    }

    fn set_notes(&self, project: &str, kind: ItemKind, number: u64, notes: Vec<Note>) {
        self.notes
            .lock()
            .unwrap()
            .insert((project.to_string(), kind, number), notes);
    }

    fn set_closing(&self, project: &str, number: u64, issues: Vec<ClosingIssue>) {
        self.closing
            .lock()
            .unwrap()
            .insert((project.to_string(), number), issues);
    }

    fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn not_found(operation: String) -> anyhow::Error {
    ApiError::Status {
        operation,
        status: 404,
        retry_after: None,
        rate_limit_reset: None,
        message: "404 Not Found".to_string(),
    }
    .into()
}

fn page_of<T: Clone>(pages: Option<&Vec<Vec<T>>>, cursor: Option<PageCursor>) -> Page<T> {
    let Some(pages) = pages else {
        return Page::last(Vec::new());
    };
    let index = cursor.and_then(|raw| raw.parse::<usize>().ok()).unwrap_or(0);
    Page {
        items: pages.get(index).cloned().unwrap_or_default(),
        next: (index + 1 < pages.len()).then(|| (index + 1).to_string()),
    }
}

#[async_trait]
impl PlatformPort for FakePlatform {
    fn platform(&self) -> Platform {
        Platform::GitLab
    }

    async fn current_user(&self) -> Result<Viewer> {
        Ok(Viewer::new("alice", Some(1)))
    }

    async fn resolve_project(&self, path: &str) -> Result<ProjectHandle> {
        self.record(format!("resolve {path}"));
        Ok(ProjectHandle {
            path: path.to_string(),
            id: Some(42),
        })
    }

    fn searches_involvement(&self) -> bool {
        self.searches_involvement
    }

    async fn list_requests_page(
        &self,
        project: &ProjectHandle,
        filter: &ListFilter,
        cursor: Option<PageCursor>,
    ) -> Result<Page<RequestRecord>> {
        self.record(format!("requests {}", project.path));
        self.filters.lock().unwrap().push(filter.clone());
        Ok(page_of(
            self.request_pages.lock().unwrap().get(&project.path),
            cursor,
        ))
    }

    async fn list_issues_page(
        &self,
        project: &ProjectHandle,
        _filter: &ListFilter,
        cursor: Option<PageCursor>,
    ) -> Result<Page<IssueRecord>> {
        self.record(format!("issues {}", project.path));
        Ok(page_of(
            self.issue_pages.lock().unwrap().get(&project.path),
            cursor,
        ))
    }

    async fn approval_state(&self, project: &ProjectHandle, number: u64) -> Result<ApprovalState> {
        self.record(format!("approvals {}!{number}", project.path));
        let key = (project.path.clone(), number);
        if self.failing_approvals.lock().unwrap().contains(&key) {
            return Err(not_found(format!("approvals {}!{number}", project.path)));
        }
        Ok(self
            .approvals
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_notes_page(
        &self,
        project: &ProjectHandle,
        kind: ItemKind,
        number: u64,
        _cursor: Option<PageCursor>,
    ) -> Result<Page<Note>> {
        self.record(format!("notes {} {kind} {number}", project.path));
        let notes = self
            .notes
            .lock()
            .unwrap()
            .get(&(project.path.clone(), kind, number))
            .cloned()
            .unwrap_or_default();
        Ok(Page::last(notes))
    }

    async fn issues_closed_by_page(
        &self,
        project: &ProjectHandle,
        number: u64,
        _cursor: Option<PageCursor>,
    ) -> Result<Page<ClosingIssue>> {
        self.record(format!("closing {}!{number}", project.path));
        match self
            .closing
            .lock()
            .unwrap()
            .get(&(project.path.clone(), number))
        {
            Some(issues) => Ok(Page::last(issues.clone())),
            None => Err(not_found(format!("closing {}!{number}", project.path))),
        }
    }
}

struct FixedClock;

impl ClockPort for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        now()
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
}

fn days_ago(days: i64) -> Option<DateTime<Utc>> {
    Some(now() - Duration::days(days))
}

fn context(projects: &[&str]) -> FetchContext {
    let retry = RetryPolicy::new(
        RetrySettings {
            max_attempts: Some(1),
            ..RetrySettings::default()
        },
        Arc::new(FixedClock),
        CancellationToken::new(),
    );
    FetchContext::new(
        Viewer::new("alice", Some(1)),
        AllowedProjects::new(projects.iter().copied()),
        now() - Duration::days(30),
        retry,
    )
    .unwrap()
}

fn request(number: u64, author: &str, body: &str, updated_days_ago: i64) -> RequestRecord {
    RequestRecord {
        project: None,
        model: RequestModel {
            number,
            title: format!("MR {number}"),
            body: body.to_string(),
            state: ItemState::Open,
            merged: false,
            updated_at: days_ago(updated_days_ago),
            web_url: format!("https://gitlab.example/team/service/-/merge_requests/{number}"),
            author: author.to_string(),
        },
        author: Some(UserRef::new(author, None)),
        assignee: None,
        assignees: Vec::new(),
        reviewers: Vec::new(),
    }
}

fn issue(number: u64, author: &str, body: &str, updated_days_ago: i64) -> IssueRecord {
    IssueRecord {
        project: None,
        model: IssueModel {
            number,
            title: format!("Issue {number}"),
            body: body.to_string(),
            state: ItemState::Open,
            updated_at: days_ago(updated_days_ago),
            web_url: format!("https://gitlab.example/team/service/-/issues/{number}"),
            author: author.to_string(),
        },
        author: Some(UserRef::new(author, None)),
        assignee: None,
        assignees: Vec::new(),
    }
}

fn note(id: u64, author: &str, body: &str) -> Note {
    Note {
        id,
        body: body.to_string(),
        author: UserRef::new(author, None),
    }
}

fn memory_cache() -> ActivityCache<SqliteBlobStore> {
    ActivityCache::new(SqliteBlobStore::in_memory().unwrap(), Platform::GitLab)
}

const NO_CACHE: Option<&ActivityCache<SqliteBlobStore>> = None;

#[tokio::test]
async fn authored_request_skips_approvals_and_notes() {
    let gh = FakePlatform::default();
    gh.set_requests("team/service", vec![vec![request(1, "alice", "", 1)]]);
    gh.set_closing("team/service", 1, Vec::new());

    let out = collect_online(&context(&["team/service"]), &gh, NO_CACHE)
        .await
        .unwrap();

    assert_eq!(out.requests.len(), 1);
    assert_eq!(out.requests[0].label, Label::Authored);
    assert!(gh.calls_matching("approvals").is_empty());
    assert!(gh.calls_matching("notes").is_empty());
}

#[tokio::test]
async fn approval_settles_request_without_reading_notes() {
    let gh = FakePlatform::default();
    gh.set_requests("team/service", vec![vec![request(2, "bob", "", 1)]]);
    gh.approve("team/service", 2, "Alice");
    gh.set_closing("team/service", 2, Vec::new());

    let out = collect_online(&context(&["team/service"]), &gh, NO_CACHE)
        .await
        .unwrap();

    assert_eq!(out.requests[0].label, Label::Reviewed);
    assert_eq!(gh.calls_matching("approvals"), vec!["approvals team/service!2"]);
    assert!(gh.calls_matching("notes").is_empty());
}

#[tokio::test]
async fn unrelated_request_reads_notes_and_falls_back_to_involved() {
    let gh = FakePlatform::default();
    gh.set_requests(
        "team/service",
        vec![vec![request(3, "bob", "", 1), request(4, "bob", "", 1)]],
    );
    gh.set_notes(
        "team/service",
        ItemKind::Request,
        3,
        vec![note(10, "alice", "looks good")],
    );
    gh.set_closing("team/service", 3, Vec::new());
    gh.set_closing("team/service", 4, Vec::new());

    let out = collect_online(&context(&["team/service"]), &gh, NO_CACHE)
        .await
        .unwrap();

    let labels: HashMap<u64, Label> = out
        .requests
        .iter()
        .map(|request| (request.model.number, request.label))
        .collect();
    assert_eq!(labels[&3], Label::Commented);
    assert_eq!(labels[&4], Label::Involved);
    assert_eq!(gh.calls_matching("notes").len(), 2);
}

#[tokio::test]
async fn issue_mentions_and_assignments_are_labelled() {
    let gh = FakePlatform::default();
    let mut assigned = issue(7, "bob", "", 2);
    assigned.assignees = vec![UserRef::new("alice", Some(1))];
    gh.set_issues(
        "team/service",
        vec![vec![
            assigned,
            issue(8, "bob", "cc @alice", 2),
            issue(9, "bob", "", 2),
        ]],
    );

    let out = collect_online(&context(&["team/service"]), &gh, NO_CACHE)
        .await
        .unwrap();

    let labels: HashMap<u64, Label> = out
        .issues
        .iter()
        .map(|issue| (issue.model.number, issue.label))
        .collect();
    assert_eq!(labels[&7], Label::Assigned);
    assert_eq!(labels[&8], Label::Mentioned);
    assert_eq!(labels[&9], Label::Involved);
    assert_eq!(
        gh.calls_matching("notes"),
        vec!["notes team/service issue 8", "notes team/service issue 9"]
    );
}

#[tokio::test]
async fn duplicate_and_stale_items_are_dropped() {
    let gh = FakePlatform::default();
    gh.set_requests(
        "team/service",
        vec![
            vec![request(1, "alice", "", 1), request(2, "alice", "", 45)],
            vec![request(1, "alice", "", 1)],
        ],
    );
    gh.set_closing("team/service", 1, Vec::new());

    let out = collect_online(&context(&["team/service"]), &gh, NO_CACHE)
        .await
        .unwrap();

    let numbers: Vec<u64> = out.requests.iter().map(|r| r.model.number).collect();
    assert_eq!(numbers, vec![1]);
    assert_eq!(gh.calls_matching("requests").len(), 2);
}

#[tokio::test]
async fn empty_allowed_set_fetches_nothing() {
    let gh = FakePlatform::default();

    let out = collect_online(&context(&[]), &gh, NO_CACHE).await.unwrap();

    assert!(out.is_empty());
    assert!(gh.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn involvement_search_runs_unscoped_without_allowed_projects() {
    let gh = FakePlatform {
        searches_involvement: true,
        ..FakePlatform::default()
    };
    let mut authored = request(5, "alice", "", 1);
    authored.project = Some("Acme/API".to_string());
    let unplaced = request(6, "alice", "", 1);
    gh.set_requests("", vec![vec![authored, unplaced]]);
    let mut mentioned = issue(8, "bob", "ping @alice", 2);
    mentioned.project = Some("acme/web".to_string());
    gh.set_issues("", vec![vec![mentioned]]);
    gh.set_closing("acme/api", 5, Vec::new());

    let out = collect_online(&context(&[]), &gh, NO_CACHE).await.unwrap();

    assert!(gh.calls_matching("resolve").is_empty());
    assert_eq!(gh.calls_matching("requests"), vec!["requests ".to_string()]);
    assert_eq!(gh.filters.lock().unwrap()[0].involves, "alice");
    assert_eq!(out.requests.len(), 1);
    assert_eq!(out.requests[0].identity(), ItemIdentity::request("acme/api", 5));
    assert_eq!(out.requests[0].label, Label::Authored);
    assert_eq!(out.issues.len(), 1);
    assert_eq!(out.issues[0].identity(), ItemIdentity::issue("acme/web", 8));
    assert_eq!(out.issues[0].label, Label::Mentioned);
}

#[tokio::test]
async fn items_reported_outside_the_allowed_projects_are_skipped() {
    let gh = FakePlatform::default();
    let mut elsewhere = request(5, "alice", "", 1);
    elsewhere.project = Some("other/repo".to_string());
    let mut here = request(6, "alice", "", 1);
    here.project = Some("Team/Service".to_string());
    gh.set_requests("team/service", vec![vec![elsewhere, here]]);
    gh.set_closing("team/service", 6, Vec::new());

    let out = collect_online(&context(&["team/service"]), &gh, NO_CACHE)
        .await
        .unwrap();

    let identities: Vec<ItemIdentity> = out.requests.iter().map(|r| r.identity()).collect();
    assert_eq!(identities, vec![ItemIdentity::request("team/service", 6)]);
    assert!(gh.calls_matching("closing other/repo").is_empty());
}

#[tokio::test]
async fn failing_item_aborts_the_fetch() {
    let gh = FakePlatform::default();
    gh.set_requests(
        "team/service",
        vec![vec![request(5, "bob", "", 1), request(6, "alice", "", 1)]],
    );
    gh.fail_approval("team/service", 5);

    let err = collect_online(&context(&["team/service"]), &gh, NO_CACHE)
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("failed to derive label for team/service!5"));
    assert!(gh.calls_matching("closing").is_empty());
}

#[tokio::test]
async fn closing_issues_are_nested_and_removed_from_standalone_list() {
    let gh = FakePlatform::default();
    gh.set_requests("team/service", vec![vec![request(1, "alice", "", 1)]]);
    gh.set_issues(
        "team/service",
        vec![vec![issue(7, "alice", "", 3), issue(8, "alice", "", 2)]],
    );
    gh.set_closing(
        "team/service",
        1,
        vec![ClosingIssue {
            number: 7,
            full_reference: Some("team/service#7".to_string()),
        }],
    );

    let out = collect_online(&context(&["team/service"]), &gh, NO_CACHE)
        .await
        .unwrap();

    assert_eq!(out.requests[0].issues.len(), 1);
    assert_eq!(out.requests[0].issues[0].model.number, 7);
    let standalone: Vec<u64> = out.issues.iter().map(|i| i.model.number).collect();
    assert_eq!(standalone, vec![8]);
}

#[tokio::test]
async fn failing_closes_endpoint_falls_back_to_body_references() {
    let gh = FakePlatform::default();
    gh.set_requests(
        "team/service",
        vec![vec![request(1, "alice", "Closes #7", 1)]],
    );
    gh.set_issues("team/service", vec![vec![issue(7, "alice", "", 3)]]);

    let out = collect_online(&context(&["team/service"]), &gh, NO_CACHE)
        .await
        .unwrap();

    assert_eq!(out.requests[0].issues.len(), 1);
    assert!(out.issues.is_empty());
}

#[tokio::test]
async fn failing_closes_endpoint_reads_notes_when_body_has_no_reference() {
    let gh = FakePlatform::default();
    gh.set_requests("team/service", vec![vec![request(1, "alice", "", 1)]]);
    gh.set_issues("team/service", vec![vec![issue(7, "alice", "", 3)]]);
    gh.set_notes(
        "team/service",
        ItemKind::Request,
        1,
        vec![note(20, "bob", "related to team/service#7")],
    );

    let out = collect_online(&context(&["team/service"]), &gh, NO_CACHE)
        .await
        .unwrap();

    assert_eq!(out.requests[0].issues[0].model.number, 7);
    assert!(out.issues.is_empty());
    assert_eq!(gh.calls_matching("notes team/service mr 1").len(), 1);
}

#[tokio::test]
async fn offline_rebuild_matches_online_links() {
    let gh = FakePlatform::default();
    gh.set_requests(
        "team/service",
        vec![vec![request(1, "bob", "", 1), request(2, "alice", "Fixes #8", 2)]],
    );
    gh.set_issues(
        "team/service",
        vec![vec![issue(7, "alice", "", 3), issue(8, "alice", "", 2), issue(9, "alice", "", 2)]],
    );
    gh.set_notes(
        "team/service",
        ItemKind::Request,
        1,
        vec![note(30, "alice", "this closes #7")],
    );
    let cache = memory_cache();
    let ctx = context(&["team/service"]);

    let online = collect_online(&ctx, &gh, Some(&cache)).await.unwrap();
    let offline = load_cached(&cache, &ctx.allowed, ctx.cutoff).unwrap();

    let shape = |collections: &activity_feed::domain::activity::ActivityCollections| {
        let mut nested: Vec<(ItemIdentity, Vec<ItemIdentity>)> = collections
            .requests
            .iter()
            .map(|request| {
                (
                    request.identity(),
                    request.issues.iter().map(|issue| issue.identity()).collect(),
                )
            })
            .collect();
        nested.sort();
        let mut standalone: Vec<ItemIdentity> =
            collections.issues.iter().map(|issue| issue.identity()).collect();
        standalone.sort();
        (nested, standalone)
    };
    assert_eq!(shape(&online), shape(&offline));
    assert_eq!(
        shape(&online).1,
        vec![ItemIdentity::issue("team/service", 9)]
    );
    assert_eq!(cache.write_failures(), 0);
}

#[tokio::test]
async fn second_fetch_flags_items_that_changed_since_the_cache() {
    let gh = FakePlatform::default();
    let cache = memory_cache();
    let ctx = context(&["team/service"]);
    gh.set_requests(
        "team/service",
        vec![vec![request(1, "alice", "", 5), request(2, "alice", "", 5)]],
    );
    gh.set_closing("team/service", 1, Vec::new());
    gh.set_closing("team/service", 2, Vec::new());

    let first = collect_online(&ctx, &gh, Some(&cache)).await.unwrap();
    assert!(first.requests.iter().all(|request| !request.has_updates));

    gh.set_requests(
        "team/service",
        vec![vec![request(1, "alice", "", 1), request(2, "alice", "", 5)]],
    );
    let second = collect_online(&ctx, &gh, Some(&cache)).await.unwrap();

    let flagged: HashMap<u64, bool> = second
        .requests
        .iter()
        .map(|request| (request.model.number, request.has_updates))
        .collect();
    assert!(flagged[&1]);
    assert!(!flagged[&2]);
}
