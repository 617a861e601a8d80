use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Serialize, Serializer};
use thiserror::Error;

/// How the viewer is involved with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Authored,
    Assigned,
    Reviewed,
    ReviewRequested,
    Commented,
    Mentioned,
    Involved,
}

impl Label {
    pub const ALL: [Label; 7] = [
        Label::Authored,
        Label::Assigned,
        Label::Reviewed,
        Label::ReviewRequested,
        Label::Commented,
        Label::Mentioned,
        Label::Involved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authored => "Authored",
            Self::Assigned => "Assigned",
            Self::Reviewed => "Reviewed",
            Self::ReviewRequested => "Review Requested",
            Self::Commented => "Commented",
            Self::Mentioned => "Mentioned",
            Self::Involved => "Involved",
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("unknown label '{0}'")]
    Unknown(String),
    #[error("label '{label}' is not valid for {scope}")]
    OutOfScope { label: Label, scope: LabelScope },
}

impl FromStr for Label {
    type Err = LabelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Label::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| LabelError::Unknown(raw.to_string()))
    }
}

/// Requests and issues rank labels differently; issues have no review labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelScope {
    Request,
    Issue,
}

impl Display for LabelScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => f.write_str("requests"),
            Self::Issue => f.write_str("issues"),
        }
    }
}

impl LabelScope {
    /// Lower is stronger. `None` means the label does not exist in this scope.
    pub fn rank(&self, label: Label) -> Option<u8> {
        match (self, label) {
            (_, Label::Authored) => Some(1),
            (_, Label::Assigned) => Some(2),
            (Self::Request, Label::Reviewed) => Some(3),
            (Self::Request, Label::ReviewRequested) => Some(4),
            (Self::Request, Label::Commented) => Some(5),
            (Self::Request, Label::Mentioned) => Some(6),
            (Self::Request, Label::Involved) => Some(7),
            (Self::Issue, Label::Commented) => Some(3),
            (Self::Issue, Label::Mentioned) => Some(4),
            (Self::Issue, Label::Involved) => Some(5),
            (Self::Issue, Label::Reviewed | Label::ReviewRequested) => None,
        }
    }

    pub fn parse(&self, raw: &str) -> Result<Label, LabelError> {
        let label = raw.parse::<Label>()?;
        if self.rank(label).is_none() {
            return Err(LabelError::OutOfScope { label, scope: *self });
        }
        Ok(label)
    }
}

/// Keeps whichever of `current` and `candidate` ranks stronger in `scope`.
pub fn merge_label(scope: LabelScope, current: Option<Label>, candidate: Label) -> Option<Label> {
    let Some(candidate_rank) = scope.rank(candidate) else {
        return current;
    };
    match current.and_then(|label| scope.rank(label).map(|rank| (label, rank))) {
        Some((label, rank)) if rank <= candidate_rank => Some(label),
        _ => Some(candidate),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LabelFold {
    scope: LabelScope,
    current: Option<Label>,
}

impl LabelFold {
    pub fn new(scope: LabelScope) -> Self {
        Self {
            scope,
            current: None,
        }
    }

    pub fn observe(&mut self, candidate: Label) {
        self.current = merge_label(self.scope, self.current, candidate);
    }

    pub fn current(&self) -> Option<Label> {
        self.current
    }

    /// Authored and Assigned cannot be beaten by anything gathered later.
    pub fn is_settled(&self) -> bool {
        matches!(self.current, Some(Label::Authored | Label::Assigned))
    }

    pub fn could_improve(&self, candidates: &[Label]) -> bool {
        candidates
            .iter()
            .any(|candidate| merge_label(self.scope, self.current, *candidate) != self.current)
    }

    pub fn finish(self) -> Label {
        self.current.unwrap_or(Label::Involved)
    }
}
