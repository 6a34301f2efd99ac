use serde::{Deserialize, Serialize};

use super::flexible_id;
use crate::status::RequestStatus;

/// One enrollment or subscription request as the server reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    #[serde(alias = "_id", deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(rename = "userId", alias = "user", deserialize_with = "flexible_id")]
    pub user_id: String,
    #[serde(rename = "courseId", alias = "course", deserialize_with = "flexible_id")]
    pub course_id: String,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_enrollment_request() {
        let json = r#"{"_id": 9, "user": 3, "courseId": "c1", "status": "canceled"}"#;
        let request: EnrollmentRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.id, "9");
        assert_eq!(request.user_id, "3");
        assert_eq!(request.course_id, "c1");
        assert_eq!(request.status, RequestStatus::Cancelled);
    }
}
