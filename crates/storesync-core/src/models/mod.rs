//! Payload models for the storefront REST API.
//!
//! The backend is not consistent about response shapes: lists come back bare
//! or wrapped, ids come back as numbers or strings. Everything here is
//! normalized at deserialization time so cached values have one shape.
//!
//! - `Notification`: flagged items driving the unread badge
//! - `Product`, `Course`, `BlogPost`: catalog pages warmed by prefetch
//! - `EnrollmentRequest`: history feeding the status gate

pub mod catalog;
pub mod enrollment;
pub mod envelope;
pub mod notification;

pub use catalog::{BlogPost, Course, Product};
pub use enrollment::EnrollmentRequest;
pub use envelope::{flexible_id, ListPayload};
pub use notification::Notification;
