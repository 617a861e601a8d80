use std::{collections::BTreeSet, ops::Range};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::identity::{normalize_project_path, parse_positive_number, ItemIdentity};

static GITLAB_ISSUE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)https?://[^\s/]+/((?:[a-z0-9_.-]+/)+[a-z0-9_.-]+)/-/issues/([0-9]+)\b")
        .expect("static gitlab issue url regex")
});
static GITHUB_ISSUE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)https?://[^\s/]+/([a-z0-9_.-]+/[a-z0-9_.-]+)/issues/([0-9]+)\b")
        .expect("static github issue url regex")
});
static QUALIFIED_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([a-z0-9_.-]+(?:/[a-z0-9_.-]+)+)#([0-9]+)\b")
        .expect("static qualified reference regex")
});
static EXACT_QUALIFIED_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([a-z0-9_.-]+(?:/[a-z0-9_.-]+)+)#([0-9]+)$")
        .expect("static exact qualified reference regex")
});
static RELATIVE_ISSUE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/-/issues/([0-9]+)\b").expect("static relative issue url regex")
});
static BARE_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9_])#([0-9]+)\b").expect("static bare reference regex")
});

/// Every issue referenced from `text`. Bare `#N` and relative `/-/issues/N`
/// resolve against `default_project`; malformed numbers are dropped.
pub fn extract_issue_references(text: &str, default_project: &str) -> BTreeSet<ItemIdentity> {
    let mut found = BTreeSet::new();
    if text.trim().is_empty() {
        return found;
    }

    let mut url_spans: Vec<Range<usize>> = Vec::new();
    for pattern in [&*GITLAB_ISSUE_URL, &*GITHUB_ISSUE_URL] {
        for caps in pattern.captures_iter(text) {
            if let Some(whole) = caps.get(0) {
                url_spans.push(whole.range());
            }
            if let Some(identity) = identity_from(caps.get(1).map(|m| m.as_str()), caps.get(2)) {
                found.insert(identity);
            }
        }
    }

    for caps in QUALIFIED_REF.captures_iter(text) {
        if let Some(identity) = identity_from(caps.get(1).map(|m| m.as_str()), caps.get(2)) {
            found.insert(identity);
        }
    }

    let default_project = normalize_project_path(default_project);
    if default_project.is_empty() {
        return found;
    }

    for caps in RELATIVE_ISSUE_URL.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if url_spans.iter().any(|span| span.contains(&whole.start())) {
            continue;
        }
        if let Some(identity) = identity_from(Some(default_project.as_str()), caps.get(1)) {
            found.insert(identity);
        }
    }

    for caps in BARE_REF.captures_iter(text) {
        if let Some(identity) = identity_from(Some(default_project.as_str()), caps.get(1)) {
            found.insert(identity);
        }
    }

    found
}

/// Parses an exact `group/sub/repo#N` reference.
pub fn parse_qualified_reference(raw: &str) -> Option<(String, u64)> {
    let caps = EXACT_QUALIFIED_REF.captures(raw.trim())?;
    let project = normalize_project_path(caps.get(1)?.as_str());
    let number = parse_positive_number(caps.get(2)?.as_str())?;
    if project.is_empty() {
        return None;
    }
    Some((project, number))
}

fn identity_from(project: Option<&str>, number: Option<regex::Match<'_>>) -> Option<ItemIdentity> {
    let project = normalize_project_path(project?);
    if project.is_empty() {
        return None;
    }
    let number = parse_positive_number(number?.as_str())?;
    Some(ItemIdentity::issue(&project, number))
}
