use std::{cmp::Ordering, fmt::Write as _};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::domain::{
    activity::{ActivityCollections, IssueActivity, RequestActivity},
    label::Label,
    platform::Platform,
};

const RULE: &str = "------------------------------------------";
const EMPTY_DATE: &str = "          ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOptions {
    pub show_links: bool,
}

/// Newest update first, ties broken by project and number, so online and
/// cached runs over the same data print the same document.
pub fn render_json(collections: &ActivityCollections) -> Result<String> {
    let mut ordered = collections.clone();
    ordered.requests.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| (&a.owner, &a.repo, a.model.number).cmp(&(&b.owner, &b.repo, b.model.number)))
    });
    for request in &mut ordered.requests {
        request.issues.sort_by(newest_issue_first);
    }
    ordered.issues.sort_by(newest_issue_first);
    serde_json::to_string_pretty(&ordered).context("failed to encode activity as JSON")
}

fn newest_issue_first(a: &IssueActivity, b: &IssueActivity) -> Ordering {
    b.updated_at
        .cmp(&a.updated_at)
        .then_with(|| (&a.owner, &a.repo, a.model.number).cmp(&(&b.owner, &b.repo, b.model.number)))
}

/// Plain-text report: open requests, closed and merged requests (merged
/// first), then open and closed standalone issues. Linked issues are
/// indented under their request.
pub fn render_text(
    collections: &ActivityCollections,
    platform: Platform,
    options: ReportOptions,
) -> String {
    if collections.is_empty() {
        return "No open activity found\n".to_string();
    }

    let mut requests: Vec<&RequestActivity> = collections.requests.iter().collect();
    requests.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    let mut issues: Vec<&IssueActivity> = collections.issues.iter().collect();
    issues.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    let (open_requests, done_requests): (Vec<_>, Vec<_>) =
        requests.into_iter().partition(|r| r.model.state.is_open());
    let (merged, closed): (Vec<_>, Vec<_>) = done_requests.into_iter().partition(|r| r.model.merged);
    let (open_issues, closed_issues): (Vec<_>, Vec<_>) =
        issues.into_iter().partition(|i| i.model.state.is_open());

    let noun = platform.request_noun();
    let mut out = String::new();
    let mut sections = 0;

    if !open_requests.is_empty() {
        section_header(&mut out, &mut sections, &format!("OPEN {noun}:"));
        for request in open_requests {
            write_request(&mut out, request, options);
        }
    }

    if !merged.is_empty() || !closed.is_empty() {
        section_header(&mut out, &mut sections, &format!("CLOSED/MERGED {noun}:"));
        for request in merged.into_iter().chain(closed) {
            write_request(&mut out, request, options);
        }
    }

    if !open_issues.is_empty() {
        section_header(&mut out, &mut sections, "OPEN ISSUES:");
        for issue in open_issues {
            write_issue(&mut out, issue, false, options);
        }
    }

    if !closed_issues.is_empty() {
        section_header(&mut out, &mut sections, "CLOSED ISSUES:");
        for issue in closed_issues {
            write_issue(&mut out, issue, false, options);
        }
    }

    out
}

fn section_header(out: &mut String, sections: &mut usize, title: &str) {
    if *sections > 0 {
        out.push('\n');
    }
    *sections += 1;
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{RULE}");
}

fn write_request(out: &mut String, request: &RequestActivity, options: ReportOptions) {
    let line = ItemLine {
        prefix: String::new(),
        updated_at: request.updated_at,
        label: request.label,
        user: &request.model.author,
        owner: &request.owner,
        repo: &request.repo,
        number: request.model.number,
        title: &request.model.title,
        has_updates: request.has_updates,
    };
    line.write(out);
    write_link(out, "   ", &request.model.web_url, options);
    for issue in &request.issues {
        write_issue(out, issue, true, options);
    }
}

fn write_issue(out: &mut String, issue: &IssueActivity, nested: bool, options: ReportOptions) {
    let prefix = if nested {
        format!("-- {} ", issue.model.state.as_str().to_uppercase())
    } else {
        String::new()
    };
    let line = ItemLine {
        prefix,
        updated_at: issue.updated_at,
        label: issue.label,
        user: &issue.model.author,
        owner: &issue.owner,
        repo: &issue.repo,
        number: issue.model.number,
        title: &issue.model.title,
        has_updates: issue.has_updates,
    };
    line.write(out);
    let indent = if nested { "      " } else { "   " };
    write_link(out, indent, &issue.model.web_url, options);
}

struct ItemLine<'a> {
    prefix: String,
    updated_at: Option<DateTime<Utc>>,
    label: Label,
    user: &'a str,
    owner: &'a str,
    repo: &'a str,
    number: u64,
    title: &'a str,
    has_updates: bool,
}

impl ItemLine<'_> {
    fn write(&self, out: &mut String) {
        let marker = if self.has_updates { "* " } else { "" };
        let date = self
            .updated_at
            .map(|at| at.format("%Y/%m/%d").to_string())
            .unwrap_or_else(|| EMPTY_DATE.to_string());
        let location = if self.repo.is_empty() {
            format!("{}#{}", self.owner, self.number)
        } else {
            format!("{}/{}#{}", self.owner, self.repo, self.number)
        };
        let _ = writeln!(
            out,
            "{marker}{}{date} {} {} {location} - {}",
            self.prefix,
            self.label.as_str().to_uppercase(),
            self.user,
            self.title
        );
    }
}

fn write_link(out: &mut String, indent: &str, url: &str, options: ReportOptions) {
    if options.show_links && !url.is_empty() {
        let _ = writeln!(out, "{indent}{url}");
    }
}
