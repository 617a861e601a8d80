use crate::domain::models::{Note, UserRef};

/// The user whose involvement is being reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub username: String,
    pub id: Option<u64>,
}

impl Viewer {
    pub fn new(username: impl Into<String>, id: Option<u64>) -> Self {
        Self {
            username: username.into(),
            id,
        }
    }

    /// Same positive id, or the same username compared trimmed and
    /// case-insensitively. A renamed account still matches by id.
    pub fn matches(&self, user: &UserRef) -> bool {
        if let (Some(mine), Some(theirs)) = (self.id, user.id) {
            if mine > 0 && mine == theirs {
                return true;
            }
        }
        let mine = self.username.trim();
        !mine.is_empty() && mine.eq_ignore_ascii_case(user.username.trim())
    }

    pub fn matches_any<'a, I>(&self, users: I) -> bool
    where
        I: IntoIterator<Item = &'a UserRef>,
    {
        users.into_iter().any(|user| self.matches(user))
    }

    pub fn mentioned_in(&self, text: &str) -> bool {
        let username = self.username.trim();
        if username.is_empty() {
            return false;
        }
        let needle = format!("@{}", username.to_lowercase());
        text.to_lowercase().contains(&needle)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoteSignals {
    pub commented: bool,
    pub mentioned: bool,
}

pub fn note_signals(body: &str, notes: &[Note], viewer: &Viewer) -> NoteSignals {
    let mut signals = NoteSignals {
        commented: false,
        mentioned: viewer.mentioned_in(body),
    };
    for note in notes {
        if viewer.matches(&note.author) {
            signals.commented = true;
        }
        if viewer.mentioned_in(&note.body) {
            signals.mentioned = true;
        }
        if signals.commented && signals.mentioned {
            break;
        }
    }
    signals
}
