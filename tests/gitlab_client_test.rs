use activity_feed::{
    domain::{identity::ItemKind, models::ItemState},
    infra::gitlab_client::GitLabClient,
    ports::{ApiError, ListFilter, PlatformPort, ProjectHandle},
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use wiremock::{
    matchers::{header, method, path, path_regex, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn since(updated_after: DateTime<Utc>) -> ListFilter {
    ListFilter {
        updated_after,
        involves: "alice".to_string(),
    }
}

fn project() -> ProjectHandle {
    ProjectHandle {
        path: "group/sub/repo".to_string(),
        id: Some(42),
    }
}

async fn client(server: &MockServer) -> GitLabClient {
    GitLabClient::new(&server.uri(), "glpat-test").unwrap()
}

#[tokio::test]
async fn current_user_sends_private_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/user"))
        .and(header("private-token", "glpat-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 5,
            "username": "alice",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let viewer = client(&server).await.current_user().await.unwrap();
    assert_eq!(viewer.username, "alice");
    assert_eq!(viewer.id, Some(5));
}

#[tokio::test]
async fn resolving_a_project_returns_its_id_and_normalized_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/v4/projects/group(%2F|/)sub(%2F|/)repo$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "path_with_namespace": "Group/Sub/Repo",
        })))
        .mount(&server)
        .await;

    let handle = client(&server)
        .await
        .resolve_project("Group/Sub/Repo")
        .await
        .unwrap();
    assert_eq!(handle, project());
}

#[tokio::test]
async fn merge_request_page_maps_fields_and_next_page_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/42/merge_requests"))
        .and(query_param("state", "all"))
        .and(query_param("scope", "all"))
        .and(query_param("updated_after", "2025-05-01T00:00:00Z"))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-next-page", "2")
                .set_body_json(json!([{
                    "iid": 7,
                    "title": "Add feed",
                    "description": "Closes #3",
                    "state": "merged",
                    "merged_at": "2025-05-03T10:00:00Z",
                    "updated_at": "2025-05-03T10:00:00Z",
                    "web_url": "https://gitlab.example/group/sub/repo/-/merge_requests/7",
                    "author": {"id": 9, "username": "bob"},
                    "assignee": null,
                    "assignees": [],
                    "reviewers": [{"id": 5, "username": "alice"}],
                }])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/42/merge_requests"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-next-page", "")
                .set_body_json(json!([])),
        )
        .mount(&server)
        .await;

    let gl = client(&server).await;
    let cutoff = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();

    let first = gl.list_requests_page(&project(), &since(cutoff), None).await.unwrap();
    assert_eq!(first.next.as_deref(), Some("2"));
    let record = &first.items[0];
    assert_eq!(record.model.number, 7);
    assert_eq!(record.model.body, "Closes #3");
    assert_eq!(record.model.state, ItemState::Closed);
    assert!(record.model.merged);
    assert_eq!(record.model.author, "bob");
    assert_eq!(record.reviewers[0].username, "alice");

    let second = gl
        .list_requests_page(&project(), &since(cutoff), first.next.clone())
        .await
        .unwrap();
    assert!(second.items.is_empty());
    assert_eq!(second.next, None);
}

#[tokio::test]
async fn rate_limited_response_keeps_retry_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/42/merge_requests/7/approval_state"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .insert_header("ratelimit-reset", "1748736000")
                .set_body_string("Retry later"),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .approval_state(&project(), 7)
        .await
        .unwrap_err();
    match err.downcast_ref::<ApiError>() {
        Some(ApiError::Status {
            status,
            retry_after,
            rate_limit_reset,
            message,
            ..
        }) => {
            assert_eq!(*status, 429);
            assert_eq!(retry_after.as_deref(), Some("7"));
            assert_eq!(rate_limit_reset.as_deref(), Some("1748736000"));
            assert_eq!(message, "Retry later");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn approval_rules_list_approvers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/42/merge_requests/7/approval_state"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rules": [
                {"name": "backend", "approved_by": [{"id": 5, "username": "alice"}]},
                {"name": "docs", "approved_by": []},
            ],
        })))
        .mount(&server)
        .await;

    let state = client(&server).await.approval_state(&project(), 7).await.unwrap();
    assert_eq!(state.rules.len(), 2);
    assert_eq!(state.rules[0].approved_by[0].id, Some(5));
}

#[tokio::test]
async fn issue_notes_use_the_issue_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/42/issues/3/notes"))
        .and(query_param("sort", "asc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 100, "body": "thanks @alice", "author": {"id": 9, "username": "bob"}},
        ])))
        .mount(&server)
        .await;

    let page = client(&server)
        .await
        .list_notes_page(&project(), ItemKind::Issue, 3, None)
        .await
        .unwrap();
    assert_eq!(page.items[0].id, 100);
    assert_eq!(page.items[0].author.username, "bob");
    assert_eq!(page.next, None);
}

#[tokio::test]
async fn closes_issues_carries_full_references() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/42/merge_requests/7/closes_issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"iid": 3, "references": {"full": "group/other#3"}},
            {"iid": 4},
        ])))
        .mount(&server)
        .await;

    let page = client(&server)
        .await
        .issues_closed_by_page(&project(), 7, None)
        .await
        .unwrap();
    assert_eq!(page.items[0].full_reference.as_deref(), Some("group/other#3"));
    assert_eq!(page.items[1].number, 4);
    assert_eq!(page.items[1].full_reference, None);
}

#[tokio::test]
async fn undecodable_body_is_a_payload_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/42/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .list_issues_page(&project(), &since(Utc::now()), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ApiError>(),
        Some(ApiError::Payload { .. })
    ));
}
