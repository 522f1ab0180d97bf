//! # Application State Management
//!
//! Shared state handed to every HTTP handler and every media-stream connection.
//!
//! ## What lives here:
//! - **config**: runtime configuration, readable by all and updatable through the API
//! - **metrics**: HTTP request counters and call outcome totals
//! - **calls**: the live call registry
//! - **workflows / connector**: the collaborators each new call is built from
//!
//! ## Arc<RwLock<T>> Pattern
//! Handlers and connection actors run concurrently on several worker threads,
//! so mutable data is wrapped in `Arc<RwLock<T>>`: any number of readers or a
//! single writer. Locks are held only for the length of a copy or an increment.
//! A poisoned lock is recovered rather than propagated, since every value
//! behind these locks stays consistent between individual field updates.

use crate::bridge::{BridgeCounters, EndReason};
use crate::config::AppConfig;
use crate::registry::CallRegistry;
use crate::session::ConversationConnector;
use crate::workflow::WorkflowProvider;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state shared across handlers and connections.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and call metrics
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Live calls
    pub calls: CallRegistry,

    /// Source of question lists for new calls
    pub workflows: Arc<dyn WorkflowProvider>,

    /// Opens the AI session for each new call
    pub connector: Arc<dyn ConversationConnector>,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected since server start.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// HTTP requests processed
    pub request_count: u64,

    /// HTTP requests that ended in a 4xx/5xx
    pub error_count: u64,

    /// Per-endpoint HTTP statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    pub calls: CallMetrics,
}

/// Call outcome totals.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct CallMetrics {
    /// Calls whose `start` frame was accepted
    pub started: u64,
    /// Calls that ended without a failure reason
    pub completed: u64,
    /// Calls that ended because something broke
    pub failed: u64,
    /// Calls refused at the concurrency limit
    pub rejected: u64,
    /// Calls that finished their whole workflow
    pub conversations_completed: u64,
    pub barge_ins: u64,
    pub reengagements: u64,
    pub nudges: u64,
    pub outbound_frames: u64,
    /// Inbound frames that could not be parsed or decoded
    pub malformed_frames: u64,
}

/// Performance metrics for one HTTP endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        workflows: Arc<dyn WorkflowProvider>,
        connector: Arc<dyn ConversationConnector>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            calls: CallRegistry::new(),
            workflows,
            connector,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so a new call or an API request
    /// never holds it while doing real work.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// Calls already in progress keep the settings they started with.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by the metrics middleware for every request.
    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn record_call_started(&self) {
        self.metrics_mut().calls.started += 1;
    }

    pub fn record_call_rejected(&self) {
        self.metrics_mut().calls.rejected += 1;
    }

    pub fn record_malformed_frame(&self) {
        self.metrics_mut().calls.malformed_frames += 1;
    }

    /// Fold a finished call's outcome and counters into the totals.
    pub fn record_call_finished(&self, reason: &EndReason, counters: &BridgeCounters) {
        let mut metrics = self.metrics_mut();
        let calls = &mut metrics.calls;

        if reason.is_failure() {
            calls.failed += 1;
        } else {
            calls.completed += 1;
        }
        if *reason == EndReason::ConversationComplete {
            calls.conversations_completed += 1;
        }

        calls.barge_ins += counters.barge_ins;
        calls.reengagements += counters.reengagements;
        calls.nudges += counters.nudges;
        calls.outbound_frames += counters.outbound_frames;
    }

    /// Copy of current metrics, taken under a single read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate between 0.0 and 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
