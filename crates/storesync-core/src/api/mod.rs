//! REST API client for the storefront backend.
//!
//! This module provides the `ApiClient` for fetching catalog, blog,
//! enrollment and notification data, and the `VerbLadder` that drives
//! writes against routes with inconsistent verb/body expectations.
//!
//! Requests carry a bearer token supplied by the host application.

pub mod client;
pub mod error;
pub mod ladder;

pub use client::ApiClient;
pub use error::ApiError;
pub use ladder::{LadderStep, LadderSuccess, VerbLadder};
