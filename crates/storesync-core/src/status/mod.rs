//! Enrollment/subscription status and the action button it implies.
//!
//! Everything here is pure: the affordance is recomputed from the latest
//! known `RequestStatus` whenever the presentation layer asks for it.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::models::EnrollmentRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    None,
    Pending,
    Approved,
    Cancelled,
}

impl RequestStatus {
    /// Parse a server status string. Unknown values fall back to `None`.
    pub fn from_server(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => RequestStatus::None,
            "pending" | "requested" | "in_review" | "in review" => RequestStatus::Pending,
            "approved" | "active" | "enrolled" | "accepted" => RequestStatus::Approved,
            "cancelled" | "canceled" | "rejected" | "declined" | "withdrawn" => {
                RequestStatus::Cancelled
            }
            other => {
                debug!(status = other, "Unknown request status, treating as none");
                RequestStatus::None
            }
        }
    }

    /// Whether this status blocks a new request for the same pair.
    pub fn is_active(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Approved)
    }
}

impl<'de> Deserialize<'de> for RequestStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().map(Self::from_server).unwrap_or_default())
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::None => write!(f, "None"),
            RequestStatus::Pending => write!(f, "Pending"),
            RequestStatus::Approved => write!(f, "Approved"),
            RequestStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Icon {
    /// Call to action (cart/enroll glyph)
    Primary,
    /// Hourglass
    Pending,
    /// Check mark
    Confirmed,
}

/// Wording of the idle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionVerb {
    #[default]
    Enroll,
    Add,
}

impl ActionVerb {
    fn idle_label(&self) -> &'static str {
        match self {
            ActionVerb::Enroll => "Enroll",
            ActionVerb::Add => "Add",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ActionAffordance {
    pub disabled: bool,
    pub label: &'static str,
    pub icon: Icon,
}

/// Button state for an enrollment surface.
pub fn derive_action(status: RequestStatus) -> ActionAffordance {
    derive_action_for(ActionVerb::Enroll, status)
}

pub fn derive_action_for(verb: ActionVerb, status: RequestStatus) -> ActionAffordance {
    match status {
        // A cancelled request does not block resubmission
        RequestStatus::None | RequestStatus::Cancelled => ActionAffordance {
            disabled: false,
            label: verb.idle_label(),
            icon: Icon::Primary,
        },
        RequestStatus::Pending => ActionAffordance {
            disabled: true,
            label: "Pending Review",
            icon: Icon::Pending,
        },
        RequestStatus::Approved => ActionAffordance {
            disabled: true,
            label: "Already Enrolled",
            icon: Icon::Confirmed,
        },
    }
}

/// Latest known status for `(user_id, course_id)` from a request history.
///
/// An active (pending/approved) request wins; otherwise any cancelled request
/// yields `Cancelled`; no request at all yields `None`.
pub fn current_status(
    requests: &[EnrollmentRequest],
    user_id: &str,
    course_id: &str,
) -> RequestStatus {
    let mut status = RequestStatus::None;
    for request in requests
        .iter()
        .filter(|r| r.user_id == user_id && r.course_id == course_id)
    {
        if request.status.is_active() {
            return request.status;
        }
        if request.status == RequestStatus::Cancelled {
            status = RequestStatus::Cancelled;
        }
    }
    status
}

/// Whether a new pending request may be created for the pair.
pub fn can_submit(requests: &[EnrollmentRequest], user_id: &str, course_id: &str) -> bool {
    !current_status(requests, user_id, course_id).is_active()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str, user: &str, course: &str, status: RequestStatus) -> EnrollmentRequest {
        EnrollmentRequest {
            id: id.to_string(),
            user_id: user.to_string(),
            course_id: course.to_string(),
            status,
            created_at: None,
        }
    }

    #[test]
    fn test_derive_action_table() {
        let none = derive_action(RequestStatus::None);
        assert!(!none.disabled);
        assert_eq!(none.label, "Enroll");
        assert_eq!(none.icon, Icon::Primary);

        let pending = derive_action(RequestStatus::Pending);
        assert!(pending.disabled);
        assert_eq!(pending.label, "Pending Review");
        assert_eq!(pending.icon, Icon::Pending);

        let approved = derive_action(RequestStatus::Approved);
        assert!(approved.disabled);
        assert_eq!(approved.label, "Already Enrolled");
        assert_eq!(approved.icon, Icon::Confirmed);
    }

    #[test]
    fn test_cancelled_matches_none() {
        let cancelled = derive_action(RequestStatus::Cancelled);
        assert_eq!(cancelled, derive_action(RequestStatus::None));
        assert!(!cancelled.disabled);
        assert_eq!(cancelled.label, "Enroll");
    }

    #[test]
    fn test_add_wording() {
        assert_eq!(derive_action_for(ActionVerb::Add, RequestStatus::None).label, "Add");
        assert_eq!(
            derive_action_for(ActionVerb::Add, RequestStatus::Pending).label,
            "Pending Review"
        );
    }

    #[test]
    fn test_from_server_is_lenient() {
        assert_eq!(RequestStatus::from_server("PENDING"), RequestStatus::Pending);
        assert_eq!(RequestStatus::from_server(" canceled "), RequestStatus::Cancelled);
        assert_eq!(RequestStatus::from_server("enrolled"), RequestStatus::Approved);
        assert_eq!(RequestStatus::from_server("archived"), RequestStatus::None);

        let parsed: RequestStatus = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, RequestStatus::None);
    }

    #[test]
    fn test_current_status_prefers_active_request() {
        let history = vec![
            request("1", "u1", "c1", RequestStatus::Cancelled),
            request("2", "u1", "c1", RequestStatus::Pending),
            request("3", "u2", "c1", RequestStatus::Approved),
        ];
        assert_eq!(current_status(&history, "u1", "c1"), RequestStatus::Pending);
        assert_eq!(current_status(&history, "u2", "c1"), RequestStatus::Approved);
        assert_eq!(current_status(&history, "u1", "c2"), RequestStatus::None);
    }

    #[test]
    fn test_cancelled_request_allows_resubmission() {
        let history = vec![request("1", "u1", "c1", RequestStatus::Cancelled)];
        assert_eq!(current_status(&history, "u1", "c1"), RequestStatus::Cancelled);
        assert!(can_submit(&history, "u1", "c1"));

        let history = vec![request("1", "u1", "c1", RequestStatus::Approved)];
        assert!(!can_submit(&history, "u1", "c1"));
    }
}
