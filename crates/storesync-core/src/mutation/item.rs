use crate::models::Notification;

/// Server payloads that carry a boolean flag the client can set optimistically.
pub trait Flagged {
    fn flag_id(&self) -> &str;

    fn server_flag(&self) -> bool;
}

impl Flagged for Notification {
    fn flag_id(&self) -> &str {
        &self.id
    }

    fn server_flag(&self) -> bool {
        self.is_read
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Set the flag (e.g. mark as read).
    Mark,
    /// Remove the item.
    Delete,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transition::Mark => write!(f, "Mark"),
            Transition::Delete => write!(f, "Delete"),
        }
    }
}

/// Where an item is in its optimistic lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationPhase {
    /// Local state agrees with what the server accepted.
    #[default]
    Confirmed,
    /// Applied locally, server call outstanding.
    OptimisticPending,
    /// Server rejected the call, local state is being rolled back.
    Reverting,
}

/// One flagged item as the UI sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagItem<P> {
    pub id: String,
    pub server_flag: bool,
    pub local_override: Option<bool>,
    pub phase: MutationPhase,
    pub payload: P,
}

impl<P: Flagged> FlagItem<P> {
    pub fn from_payload(payload: P) -> Self {
        Self {
            id: payload.flag_id().to_string(),
            server_flag: payload.server_flag(),
            local_override: None,
            phase: MutationPhase::Confirmed,
            payload,
        }
    }
}

impl<P> FlagItem<P> {
    /// The value shown to the user.
    pub fn effective_flag(&self) -> bool {
        self.local_override.unwrap_or(self.server_flag)
    }

    pub fn is_pending(&self) -> bool {
        self.phase == MutationPhase::OptimisticPending
    }

    pub(crate) fn begin(&mut self) {
        self.phase = MutationPhase::OptimisticPending;
    }

    pub(crate) fn confirm(&mut self) {
        self.phase = MutationPhase::Confirmed;
    }

    /// Roll back to `previous_override`, passing through `Reverting`.
    pub(crate) fn revert(&mut self, previous_override: Option<bool>) {
        self.phase = MutationPhase::Reverting;
        self.local_override = previous_override;
        self.phase = MutationPhase::Confirmed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(id: &str, is_read: bool) -> Notification {
        Notification {
            id: id.to_string(),
            title: String::new(),
            message: String::new(),
            is_read,
            created_at: None,
        }
    }

    #[test]
    fn test_effective_flag_prefers_override() {
        let mut item = FlagItem::from_payload(notification("n1", false));
        assert!(!item.effective_flag());

        item.local_override = Some(true);
        assert!(item.effective_flag());

        item.server_flag = true;
        item.local_override = None;
        assert!(item.effective_flag());
    }

    #[test]
    fn test_revert_restores_previous_override() {
        let mut item = FlagItem::from_payload(notification("n1", false));
        item.begin();
        item.local_override = Some(true);
        assert!(item.is_pending());

        item.revert(None);
        assert_eq!(item.phase, MutationPhase::Confirmed);
        assert!(!item.effective_flag());
    }
}
