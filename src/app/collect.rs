use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::Instant,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{
    app::{
        cache::ActivityCache,
        context::FetchContext,
        derive::{derive_issue_label, derive_request_label},
        linker::link_online,
        pagination::collect_pages,
    },
    domain::{
        activity::{ActivityCollections, IssueActivity, RequestActivity},
        identity::{normalize_project_path, ItemIdentity, ItemKind},
        models::{within_cutoff, Note, NoteRecord},
    },
    ports::{BlobStorePort, ListFilter, PlatformPort, ProjectHandle},
};

/// Fetches everything the viewer is involved in across the allowed
/// projects, caching as it goes, then links issues to requests. With no
/// allowed projects only a platform that searches by involvement lists
/// anything.
///
/// The first failing item aborts the whole fetch.
pub async fn collect_online<P, S>(
    ctx: &FetchContext,
    platform: &P,
    cache: Option<&ActivityCache<S>>,
) -> Result<ActivityCollections>
where
    P: PlatformPort + ?Sized,
    S: BlobStorePort,
{
    let started = Instant::now();
    let mut projects: BTreeMap<String, ProjectHandle> = BTreeMap::new();
    let scopes: Vec<ProjectHandle> = if ctx.allowed.is_empty() {
        if !platform.searches_involvement() {
            debug!("no allowed projects; nothing to fetch");
            return Ok(ActivityCollections::default());
        }
        debug!("no allowed projects; listing everything the viewer is involved in");
        vec![ProjectHandle::unscoped()]
    } else {
        for path in ctx.allowed.paths() {
            let operation = format!("resolve project {path}");
            let handle = ctx
                .retry
                .execute(&operation, || platform.resolve_project(path))
                .await
                .with_context(|| format!("failed to resolve project {path}"))?;
            projects.insert(normalize_project_path(path), handle);
        }
        projects.values().cloned().collect()
    };

    let filter = ListFilter {
        updated_after: ctx.cutoff,
        involves: ctx.viewer.username.trim().to_string(),
    };
    let mut seen: HashSet<ItemIdentity> = HashSet::new();
    let mut requests: Vec<RequestActivity> = Vec::new();
    let mut issues: Vec<IssueActivity> = Vec::new();
    let mut held_notes: HashMap<ItemIdentity, Vec<Note>> = HashMap::new();

    for scope in &scopes {
        let operation = format!("list requests for {}", scope_name(scope));
        let records = collect_pages(&ctx.retry, &operation, |cursor| {
            platform.list_requests_page(scope, &filter, cursor)
        })
        .await
        .with_context(|| format!("failed to list requests for {}", scope_name(scope)))?;

        for record in records {
            let Some(project) = item_project(ctx, &mut projects, scope, record.project.as_deref())
            else {
                continue;
            };
            let identity = ItemIdentity::request(&project.path, record.model.number);
            if !seen.insert(identity.clone()) || !within_cutoff(record.model.updated_at, ctx.cutoff)
            {
                continue;
            }

            let derivation = derive_request_label(ctx, platform, &project, &record).await?;
            let mut activity =
                RequestActivity::new(&project.path, record.model.clone(), derivation.label);
            if let Some(cache) = cache {
                activity.has_updates = has_updates(cache, &identity, record.model.updated_at);
                if let Err(err) = cache.upsert_request(&identity, &record.model, derivation.label) {
                    cache.record_write_failure("request", &err);
                }
                if let Some(notes) = &derivation.notes {
                    store_notes(cache, &project.path, ItemKind::Request, record.model.number, notes);
                }
            }
            if let Some(notes) = derivation.notes {
                held_notes.insert(identity, notes);
            }
            requests.push(activity);
        }

        let operation = format!("list issues for {}", scope_name(scope));
        let records = collect_pages(&ctx.retry, &operation, |cursor| {
            platform.list_issues_page(scope, &filter, cursor)
        })
        .await
        .with_context(|| format!("failed to list issues for {}", scope_name(scope)))?;

        for record in records {
            let Some(project) = item_project(ctx, &mut projects, scope, record.project.as_deref())
            else {
                continue;
            };
            let identity = ItemIdentity::issue(&project.path, record.model.number);
            if !seen.insert(identity.clone()) || !within_cutoff(record.model.updated_at, ctx.cutoff)
            {
                continue;
            }

            let derivation = derive_issue_label(ctx, platform, &project, &record).await?;
            let mut activity =
                IssueActivity::new(&project.path, record.model.clone(), derivation.label);
            if let Some(cache) = cache {
                activity.has_updates = has_updates(cache, &identity, record.model.updated_at);
                if let Err(err) = cache.upsert_issue(&identity, &record.model, derivation.label) {
                    cache.record_write_failure("issue", &err);
                }
                if let Some(notes) = &derivation.notes {
                    store_notes(cache, &project.path, ItemKind::Issue, record.model.number, notes);
                }
            }
            issues.push(activity);
        }
    }

    let request_count = requests.len();
    let issue_count = issues.len();
    let collections =
        link_online(ctx, platform, &projects, requests, issues, &held_notes, cache).await?;

    info!(
        platform = %platform.platform(),
        projects = projects.len(),
        requests = request_count,
        issues = issue_count,
        standalone_issues = collections.issues.len(),
        cache_write_failures = cache.map(|cache| cache.write_failures()).unwrap_or(0),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "fetch finished"
    );
    Ok(collections)
}

fn scope_name(scope: &ProjectHandle) -> &str {
    if scope.is_unscoped() {
        "all involved projects"
    } else {
        &scope.path
    }
}

/// The project a listed record belongs to. A record that names its own
/// project outside the allowed set is dropped, and so is one from an
/// unscoped listing that names none.
fn item_project(
    ctx: &FetchContext,
    projects: &mut BTreeMap<String, ProjectHandle>,
    scope: &ProjectHandle,
    reported: Option<&str>,
) -> Option<ProjectHandle> {
    let path = match reported.map(normalize_project_path) {
        Some(path) if !path.is_empty() => path,
        _ if scope.is_unscoped() => return None,
        _ => return Some(scope.clone()),
    };
    if path == scope.path {
        return Some(scope.clone());
    }
    if !ctx.allowed.allows(&path) {
        debug!(project = %path, "skipping item outside the allowed projects");
        return None;
    }
    let handle = projects
        .entry(path.clone())
        .or_insert_with(|| ProjectHandle { path, id: None });
    Some(handle.clone())
}

/// True when the cache held an older copy of the item.
fn has_updates<S: BlobStorePort>(
    cache: &ActivityCache<S>,
    identity: &ItemIdentity,
    updated_at: Option<DateTime<Utc>>,
) -> bool {
    match cache.cached_updated_at(identity) {
        Ok(Some(previous)) => updated_at.is_some_and(|current| current > previous),
        Ok(None) => false,
        Err(err) => {
            debug!(item = %identity, error = %format!("{err:#}"), "could not read cached copy");
            false
        }
    }
}

fn store_notes<S: BlobStorePort>(
    cache: &ActivityCache<S>,
    project: &str,
    kind: ItemKind,
    number: u64,
    notes: &[Note],
) {
    for note in notes {
        let record = NoteRecord::from_note(project, kind, number, note);
        if let Err(err) = cache.append_note(&record) {
            cache.record_write_failure("note", &err);
        }
    }
}
