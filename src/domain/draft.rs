//! Reply draft domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DraftId, EmailId};

/// Where a reply draft is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftState {
    /// No content yet.
    Empty,
    /// A reply is being generated.
    Generating,
    /// Content matches what was last saved (or was just generated).
    Ready,
    /// Local edits exist that have not been saved.
    Editing,
    /// A save is in flight.
    Saving,
    /// A send is in flight.
    Sending,
    /// The reply was sent.
    Sent,
}

impl DraftState {
    /// Returns true while a provider call is outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            DraftState::Generating | DraftState::Saving | DraftState::Sending
        )
    }
}

/// Reply draft for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    /// Message being replied to.
    pub email_id: EmailId,
    /// Reply body.
    pub content: String,
    /// Provider draft id, set by the first successful save.
    pub draft_id: Option<DraftId>,
    /// Time of the last successful save.
    pub saved_at: Option<DateTime<Utc>>,
    /// Whether local edits exist since the last save.
    pub dirty: bool,
    /// Current lifecycle state.
    pub state: DraftState,
    /// Message of the last failed step, cleared by the next success.
    pub last_error: Option<String>,
}

impl Draft {
    /// Creates an empty draft for a message.
    pub fn new(email_id: EmailId) -> Self {
        Self {
            email_id,
            content: String::new(),
            draft_id: None,
            saved_at: None,
            dirty: false,
            state: DraftState::Empty,
            last_error: None,
        }
    }

    /// Returns true when there is nothing worth saving or sending.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// The state to fall back to when a provider step fails.
    pub fn stable_state(&self) -> DraftState {
        if self.is_blank() {
            DraftState::Empty
        } else if self.dirty {
            DraftState::Editing
        } else {
            DraftState::Ready
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_draft_is_empty() {
        let draft = Draft::new(EmailId::from("m-1"));
        assert_eq!(draft.state, DraftState::Empty);
        assert!(draft.is_blank());
        assert!(!draft.dirty);
        assert!(draft.draft_id.is_none());
    }

    #[test]
    fn whitespace_content_is_blank() {
        let mut draft = Draft::new(EmailId::from("m-1"));
        draft.content = " \n\t ".to_string();
        assert!(draft.is_blank());
    }

    #[test]
    fn stable_state_tracks_dirtiness() {
        let mut draft = Draft::new(EmailId::from("m-1"));
        assert_eq!(draft.stable_state(), DraftState::Empty);

        draft.content = "Thanks!".to_string();
        assert_eq!(draft.stable_state(), DraftState::Ready);

        draft.dirty = true;
        assert_eq!(draft.stable_state(), DraftState::Editing);
    }

    #[test]
    fn busy_states() {
        assert!(DraftState::Saving.is_busy());
        assert!(!DraftState::Editing.is_busy());
        assert_eq!(
            serde_json::to_string(&DraftState::Editing).unwrap(),
            "\"editing\""
        );
    }
}
