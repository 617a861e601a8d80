use anyhow::{Context, Result};

use crate::{
    app::{context::FetchContext, pagination::collect_pages},
    domain::{
        identity::{ItemIdentity, ItemKind},
        involvement::{note_signals, Viewer},
        label::{Label, LabelFold, LabelScope},
        models::{IssueRecord, Note, RequestRecord, UserRef},
    },
    ports::{PlatformPort, ProjectHandle},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    pub label: Label,
    /// Notes fetched while deriving, if any were needed.
    pub notes: Option<Vec<Note>>,
}

pub async fn derive_request_label<P>(
    ctx: &FetchContext,
    platform: &P,
    project: &ProjectHandle,
    record: &RequestRecord,
) -> Result<Derivation>
where
    P: PlatformPort + ?Sized,
{
    let number = record.model.number;
    let identity = ItemIdentity::request(&project.path, number);
    let mut fold = LabelFold::new(LabelScope::Request);

    if is_author(&ctx.viewer, record.author.as_ref(), &record.model.author) {
        fold.observe(Label::Authored);
    }
    if is_assigned(&ctx.viewer, record.assignee.as_ref(), &record.assignees) {
        fold.observe(Label::Assigned);
    }
    if fold.is_settled() {
        return Ok(Derivation {
            label: fold.finish(),
            notes: None,
        });
    }

    let operation = format!("approval state for {identity}");
    let approvals = ctx
        .retry
        .execute(&operation, || platform.approval_state(project, number))
        .await
        .with_context(|| format!("failed to derive label for {identity}"))?;
    let approved = approvals
        .rules
        .iter()
        .any(|rule| ctx.viewer.matches_any(&rule.approved_by));
    if approved {
        fold.observe(Label::Reviewed);
    }
    if ctx.viewer.matches_any(&record.reviewers) {
        fold.observe(Label::ReviewRequested);
    }

    if !fold.could_improve(&[Label::Commented, Label::Mentioned]) {
        return Ok(Derivation {
            label: fold.finish(),
            notes: None,
        });
    }

    let notes = fetch_notes(ctx, platform, project, ItemKind::Request, number)
        .await
        .with_context(|| format!("failed to derive label for {identity}"))?;
    observe_notes(&mut fold, &record.model.body, &notes, &ctx.viewer);

    Ok(Derivation {
        label: fold.finish(),
        notes: Some(notes),
    })
}

pub async fn derive_issue_label<P>(
    ctx: &FetchContext,
    platform: &P,
    project: &ProjectHandle,
    record: &IssueRecord,
) -> Result<Derivation>
where
    P: PlatformPort + ?Sized,
{
    let number = record.model.number;
    let identity = ItemIdentity::issue(&project.path, number);
    let mut fold = LabelFold::new(LabelScope::Issue);

    if is_author(&ctx.viewer, record.author.as_ref(), &record.model.author) {
        fold.observe(Label::Authored);
    }
    if is_assigned(&ctx.viewer, record.assignee.as_ref(), &record.assignees) {
        fold.observe(Label::Assigned);
    }
    if fold.is_settled() {
        return Ok(Derivation {
            label: fold.finish(),
            notes: None,
        });
    }

    let notes = fetch_notes(ctx, platform, project, ItemKind::Issue, number)
        .await
        .with_context(|| format!("failed to derive label for {identity}"))?;
    observe_notes(&mut fold, &record.model.body, &notes, &ctx.viewer);

    Ok(Derivation {
        label: fold.finish(),
        notes: Some(notes),
    })
}

pub(crate) async fn fetch_notes<P>(
    ctx: &FetchContext,
    platform: &P,
    project: &ProjectHandle,
    kind: ItemKind,
    number: u64,
) -> Result<Vec<Note>>
where
    P: PlatformPort + ?Sized,
{
    let operation = format!(
        "notes for {}",
        ItemIdentity::new(kind, &project.path, number)
    );
    collect_pages(&ctx.retry, &operation, |cursor| {
        platform.list_notes_page(project, kind, number, cursor)
    })
    .await
}

fn observe_notes(fold: &mut LabelFold, body: &str, notes: &[Note], viewer: &Viewer) {
    let signals = note_signals(body, notes, viewer);
    if signals.mentioned {
        fold.observe(Label::Mentioned);
    }
    if signals.commented {
        fold.observe(Label::Commented);
    }
}

fn is_author(viewer: &Viewer, author: Option<&UserRef>, fallback_username: &str) -> bool {
    match author {
        Some(author) => viewer.matches(author),
        None => viewer.matches(&UserRef::new(fallback_username, None)),
    }
}

fn is_assigned(viewer: &Viewer, assignee: Option<&UserRef>, assignees: &[UserRef]) -> bool {
    viewer.matches_any(assignees) || assignee.is_some_and(|user| viewer.matches(user))
}
