//! Session-scoped wiring of the sync layer.
//!
//! `SyncContext` owns the single `CacheStore`, `LocalOverlay`, `ApiClient`
//! and notification `Reconciler` of one session and hands out queries built
//! from the configured cache windows. Hosts create one and clone it into
//! whatever needs it; tests build their own.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::api::ApiClient;
use crate::cache::{CacheConfig, CacheStore, PrefetchScheduler, Query};
use crate::config::Config;
use crate::models::{BlogPost, Course, EnrollmentRequest, Notification, Product};
use crate::mutation::{Reconciler, ReconcilerOptions};
use crate::overlay::LocalOverlay;
use crate::status::{self, ActionAffordance, ActionVerb, RequestStatus};
use crate::sync::NotificationFeed;

/// Validated cache windows, one per resource.
#[derive(Debug, Clone, Copy)]
pub struct ResourceWindows {
    pub products: CacheConfig,
    pub courses: CacheConfig,
    pub blog: CacheConfig,
    pub notifications: CacheConfig,
    pub enrollment: CacheConfig,
}

impl ResourceWindows {
    pub fn from_config(config: &Config) -> Result<Self> {
        let policies = &config.cache;
        Ok(Self {
            products: policies.products.cache_config().context("Invalid products cache policy")?,
            courses: policies.courses.cache_config().context("Invalid courses cache policy")?,
            blog: policies.blog.cache_config().context("Invalid blog cache policy")?,
            notifications: policies
                .notifications
                .cache_config()
                .context("Invalid notifications cache policy")?,
            enrollment: policies
                .enrollment
                .cache_config()
                .context("Invalid enrollment cache policy")?,
        })
    }
}

#[derive(Clone)]
pub struct SyncContext {
    store: CacheStore,
    overlay: LocalOverlay,
    api: Arc<ApiClient>,
    reconciler: Reconciler<Notification>,
    windows: ResourceWindows,
}

impl SyncContext {
    /// Build a context from configuration, with the overlay on disk.
    pub fn new(config: &Config) -> Result<Self> {
        let mut api = ApiClient::new(config.api_base_url.clone(), config.request_timeout())
            .context("Failed to build HTTP client")?;
        match Config::token() {
            Some(token) => api.set_token(token),
            None => debug!("No bearer token configured, requests are anonymous"),
        }

        let overlay = LocalOverlay::open(
            config.overlay_dir()?,
            config.overlay.namespace.clone(),
            config.overlay.max_entries,
        )
        .context("Failed to open overlay directory")?;

        Self::with_parts(api, overlay, config)
    }

    /// Build a context from an existing client and overlay.
    pub fn with_parts(api: ApiClient, overlay: LocalOverlay, config: &Config) -> Result<Self> {
        let options = ReconcilerOptions {
            clear_on_confirm: config.overlay.clear_on_confirm,
            ..ReconcilerOptions::default()
        };

        Ok(Self {
            store: CacheStore::new(),
            reconciler: Reconciler::new(overlay.clone(), options),
            overlay,
            api: Arc::new(api),
            windows: ResourceWindows::from_config(config)?,
        })
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn overlay(&self) -> &LocalOverlay {
        &self.overlay
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn reconciler(&self) -> &Reconciler<Notification> {
        &self.reconciler
    }

    pub fn windows(&self) -> &ResourceWindows {
        &self.windows
    }

    // ===== Queries =====

    pub fn products_query(&self) -> Query<Vec<Product>> {
        let api = Arc::clone(&self.api);
        Query::new("products:all", self.windows.products, move || {
            let api = Arc::clone(&api);
            async move { api.fetch_products().await }
        })
    }

    pub fn courses_query(&self) -> Query<Vec<Course>> {
        let api = Arc::clone(&self.api);
        Query::new("courses:all", self.windows.courses, move || {
            let api = Arc::clone(&api);
            async move { api.fetch_courses().await }
        })
    }

    pub fn blog_posts_query(&self) -> Query<Vec<BlogPost>> {
        let api = Arc::clone(&self.api);
        Query::new("blog:all", self.windows.blog, move || {
            let api = Arc::clone(&api);
            async move { api.fetch_blog_posts().await }
        })
    }

    pub fn blog_post_query(&self, id: &str) -> Query<BlogPost> {
        let api = Arc::clone(&self.api);
        let id = id.to_string();
        Query::new(format!("blog:{}", id), self.windows.blog, move || {
            let api = Arc::clone(&api);
            let id = id.clone();
            async move { api.fetch_blog_post(&id).await }
        })
    }

    pub fn notifications_query(&self) -> Query<Vec<Notification>> {
        let api = Arc::clone(&self.api);
        Query::new("notifications:all", self.windows.notifications, move || {
            let api = Arc::clone(&api);
            async move { api.fetch_notifications().await }
        })
    }

    pub fn enrollments_query(&self, course_id: &str) -> Query<Vec<EnrollmentRequest>> {
        let api = Arc::clone(&self.api);
        let course_id = course_id.to_string();
        Query::new(format!("enrollment:{}", course_id), self.windows.enrollment, move || {
            let api = Arc::clone(&api);
            let course_id = course_id.clone();
            async move { api.fetch_enrollments(&course_id).await }
        })
    }

    /// Warmers for the pages a visitor is likely to open first.
    pub fn prefetch_scheduler(&self) -> PrefetchScheduler {
        let mut scheduler = PrefetchScheduler::new(self.store.clone());
        scheduler
            .register(self.products_query())
            .register(self.courses_query())
            .register(self.blog_posts_query())
            .register(self.notifications_query());
        scheduler
    }

    pub fn notification_feed(&self) -> NotificationFeed<ApiClient> {
        NotificationFeed::new(
            self.store.clone(),
            self.notifications_query(),
            self.reconciler.clone(),
            Arc::clone(&self.api),
        )
    }

    // ===== Enrollment status =====

    pub async fn enrollment_status(&self, course_id: &str, user_id: &str) -> Result<RequestStatus> {
        let requests = self.enrollments_query(course_id).fetch(&self.store).await?;
        Ok(status::current_status(&requests, user_id, course_id))
    }

    /// Button state for `user_id` on `course_id`.
    pub async fn enrollment_action(
        &self,
        course_id: &str,
        user_id: &str,
        verb: ActionVerb,
    ) -> Result<ActionAffordance> {
        let current = self.enrollment_status(course_id, user_id).await?;
        Ok(status::derive_action_for(verb, current))
    }

    /// Forget the overlay and every cached entry (logout).
    pub fn reset(&self) {
        self.overlay.reset();
        self.store.clear();
    }
}
