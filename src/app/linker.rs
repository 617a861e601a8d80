use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::{Context, Result};
use tracing::debug;

use crate::{
    app::{
        cache::ActivityCache,
        context::FetchContext,
        derive::fetch_notes,
        pagination::collect_pages,
        retry::is_cancelled,
    },
    domain::{
        activity::{ActivityCollections, IssueActivity, RequestActivity},
        identity::{ItemIdentity, ItemKind},
        models::{ClosingIssue, Note, NoteRecord},
        references::{extract_issue_references, parse_qualified_reference},
    },
    ports::{BlobStorePort, PlatformPort, ProjectHandle},
};

/// Request identity to the issues it links to.
pub type LinkMap = BTreeMap<ItemIdentity, BTreeSet<ItemIdentity>>;

/// Issue references in the body, or in the notes when the body has none.
pub fn references_from_texts(body: &str, notes: &[Note], project: &str) -> BTreeSet<ItemIdentity> {
    let from_body = extract_issue_references(body, project);
    if !from_body.is_empty() {
        return from_body;
    }
    notes
        .iter()
        .flat_map(|note| extract_issue_references(&note.body, project))
        .collect()
}

/// Nests linked issues under their requests and returns the issues nothing
/// links to as the standalone list. Unknown identities are dropped.
pub fn nest_and_partition(
    mut requests: Vec<RequestActivity>,
    issues: Vec<IssueActivity>,
    links: &LinkMap,
) -> ActivityCollections {
    let by_identity: HashMap<ItemIdentity, &IssueActivity> =
        issues.iter().map(|issue| (issue.identity(), issue)).collect();
    let mut nested: HashSet<ItemIdentity> = HashSet::new();

    for request in &mut requests {
        let Some(linked) = links.get(&request.identity()) else {
            continue;
        };
        let mut children: Vec<IssueActivity> = linked
            .iter()
            .filter_map(|identity| by_identity.get(identity).map(|issue| (*issue).clone()))
            .collect();
        children.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.identity().cmp(&b.identity()))
        });
        nested.extend(children.iter().map(IssueActivity::identity));
        request.issues = children;
    }

    let standalone = issues
        .into_iter()
        .filter(|issue| !nested.contains(&issue.identity()))
        .collect();

    ActivityCollections {
        requests,
        issues: standalone,
    }
}

fn closing_identities(project: &str, closing: &[ClosingIssue]) -> BTreeSet<ItemIdentity> {
    closing
        .iter()
        .filter_map(|issue| {
            issue
                .full_reference
                .as_deref()
                .and_then(parse_qualified_reference)
                .map(|(path, number)| ItemIdentity::issue(&path, number))
                .or_else(|| (issue.number > 0).then(|| ItemIdentity::issue(project, issue.number)))
        })
        .collect()
}

/// Resolves links with the platform's "closed by" endpoint, falling back
/// to reference text in the body and then the notes when the endpoint fails.
pub async fn link_online<P, S>(
    ctx: &FetchContext,
    platform: &P,
    projects: &BTreeMap<String, ProjectHandle>,
    requests: Vec<RequestActivity>,
    issues: Vec<IssueActivity>,
    held_notes: &HashMap<ItemIdentity, Vec<Note>>,
    cache: Option<&ActivityCache<S>>,
) -> Result<ActivityCollections>
where
    P: PlatformPort + ?Sized,
    S: BlobStorePort,
{
    let mut links = LinkMap::new();

    for request in &requests {
        let identity = request.identity();
        let path = request.project_path();
        let project = projects
            .get(&identity.project)
            .cloned()
            .unwrap_or_else(|| ProjectHandle {
                path: identity.project.clone(),
                id: None,
            });
        let number = request.model.number;

        let operation = format!("issues closed by {identity}");
        let closing = collect_pages(&ctx.retry, &operation, |cursor| {
            platform.issues_closed_by_page(&project, number, cursor)
        })
        .await;

        let linked = match closing {
            Ok(closing) => closing_identities(&identity.project, &closing),
            Err(err) if is_cancelled(&err) => return Err(err),
            Err(err) => {
                debug!(request = %identity, error = %format!("{err:#}"), "closes endpoint failed, parsing text");
                let from_body = extract_issue_references(&request.model.body, &path);
                if from_body.is_empty() {
                    let notes = match held_notes.get(&identity) {
                        Some(notes) => notes.clone(),
                        None => fetch_and_store_notes(ctx, platform, &project, number, cache).await?,
                    };
                    references_from_texts("", &notes, &path)
                } else {
                    from_body
                }
            }
        };

        if !linked.is_empty() {
            links.insert(identity, linked);
        }
    }

    Ok(nest_and_partition(requests, issues, &links))
}

async fn fetch_and_store_notes<P, S>(
    ctx: &FetchContext,
    platform: &P,
    project: &ProjectHandle,
    number: u64,
    cache: Option<&ActivityCache<S>>,
) -> Result<Vec<Note>>
where
    P: PlatformPort + ?Sized,
    S: BlobStorePort,
{
    let notes = match fetch_notes(ctx, platform, project, ItemKind::Request, number).await {
        Ok(notes) => notes,
        Err(err) if is_cancelled(&err) => return Err(err),
        Err(err) => {
            debug!(project = %project.path, number, error = %format!("{err:#}"), "note fetch for linking failed");
            return Ok(Vec::new());
        }
    };

    if let Some(cache) = cache {
        for note in &notes {
            let record = NoteRecord::from_note(&project.path, ItemKind::Request, number, note);
            if let Err(err) = cache.append_note(&record) {
                cache.record_write_failure("note", &err);
            }
        }
    }
    Ok(notes)
}

/// Same links as online, rebuilt from cached bodies and notes only.
pub fn link_offline<S: BlobStorePort>(
    cache: &ActivityCache<S>,
    requests: Vec<RequestActivity>,
    issues: Vec<IssueActivity>,
) -> Result<ActivityCollections> {
    let mut links = LinkMap::new();

    for request in &requests {
        let identity = request.identity();
        let path = request.project_path();
        let mut linked = extract_issue_references(&request.model.body, &path);
        if linked.is_empty() {
            let notes = cache
                .notes(&path, ItemKind::Request, request.model.number)
                .with_context(|| format!("failed to read cached notes for {identity}"))?;
            linked = references_from_texts("", &notes, &path);
        }
        if !linked.is_empty() {
            links.insert(identity, linked);
        }
    }

    Ok(nest_and_partition(requests, issues, &links))
}
