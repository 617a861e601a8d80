use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
    app::{cache::ActivityCache, linker::link_offline},
    domain::{
        activity::{ActivityCollections, IssueActivity, RequestActivity},
        identity::{AllowedProjects, ItemIdentity, ItemKind},
        models::within_cutoff,
    },
    ports::BlobStorePort,
};

/// Rebuilds the report from the cache alone, with the same cutoff and
/// project filters as an online fetch.
pub fn load_cached<S: BlobStorePort>(
    cache: &ActivityCache<S>,
    allowed: &AllowedProjects,
    cutoff: DateTime<Utc>,
) -> Result<ActivityCollections> {
    let cached_requests = cache
        .load_requests()
        .context("failed to load cached requests")?;
    let cached_issues = cache.load_issues().context("failed to load cached issues")?;

    let mut requests = Vec::new();
    for (key, model) in cached_requests.models {
        let Some(identity) = ItemIdentity::parse_cache_key(ItemKind::Request, &key) else {
            continue;
        };
        if !allowed.allows(&identity.project) || !within_cutoff(model.updated_at, cutoff) {
            continue;
        }
        let Some(label) = cached_requests.labels.get(&key).copied() else {
            continue;
        };
        requests.push(RequestActivity::new(&identity.project, model, label));
    }

    let mut issues = Vec::new();
    for (key, model) in cached_issues.models {
        let Some(identity) = ItemIdentity::parse_cache_key(ItemKind::Issue, &key) else {
            continue;
        };
        if !allowed.allows(&identity.project) || !within_cutoff(model.updated_at, cutoff) {
            continue;
        }
        let Some(label) = cached_issues.labels.get(&key).copied() else {
            continue;
        };
        issues.push(IssueActivity::new(&identity.project, model, label));
    }

    info!(
        platform = %cache.platform(),
        requests = requests.len(),
        issues = issues.len(),
        "loaded cached activity"
    );
    link_offline(cache, requests, issues)
}
