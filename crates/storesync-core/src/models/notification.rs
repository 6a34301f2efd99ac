use serde::{Deserialize, Serialize};

use super::flexible_id;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Notification {
    #[serde(alias = "_id", deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    // Older endpoints call it "body"
    #[serde(default, alias = "body")]
    pub message: String,
    #[serde(rename = "isRead", alias = "read", default)]
    pub is_read: bool,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

impl Notification {
    pub fn formatted_date(&self) -> String {
        match &self.created_at {
            Some(date) => match chrono::DateTime::parse_from_rfc3339(date) {
                Ok(dt) => dt.format("%b %d, %Y").to_string(),
                Err(_) => date.chars().take(10).collect(),
            },
            None => String::new(),
        }
    }
}
