//! Registry of live calls.
//!
//! Each media-stream connection registers itself once its `start` frame has
//! been accepted and removes itself when it stops. The registry enforces the
//! concurrent call limit and lets HTTP handlers reach a call's actor by
//! `call_sid` without knowing the actor type.

use crate::bridge::BridgeStatus;
use actix::prelude::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Ask a call for its current status. `None` once the bridge is gone.
#[derive(Message)]
#[rtype(result = "Option<BridgeStatus>")]
pub struct GetCallStatus;

/// End a call from outside. Returns false if it had already ended.
#[derive(Message)]
#[rtype(result = "bool")]
pub struct HangUp;

/// Addresses of one call's connection actor.
#[derive(Clone)]
pub struct CallHandle {
    pub status: Recipient<GetCallStatus>,
    pub hang_up: Recipient<HangUp>,
}

#[derive(Clone)]
pub struct CallEntry {
    pub connection_id: String,
    pub call_sid: String,
    pub stream_sid: String,
    pub started_at: DateTime<Utc>,
    pub handle: CallHandle,
}

impl CallEntry {
    pub fn summary(&self) -> CallSummary {
        CallSummary {
            connection_id: self.connection_id.clone(),
            call_sid: self.call_sid.clone(),
            stream_sid: self.stream_sid.clone(),
            started_at: self.started_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallSummary {
    pub connection_id: String,
    pub call_sid: String,
    pub stream_sid: String,
    pub started_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// The configured concurrent call limit was reached
    Full(usize),
    /// The connection is already registered
    Duplicate(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Full(max) => write!(f, "Maximum concurrent calls ({}) reached", max),
            RegistryError::Duplicate(id) => write!(f, "Connection '{}' already registered", id),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Live calls keyed by connection id.
///
/// Cloning is cheap and every clone shares the same map.
#[derive(Clone, Default)]
pub struct CallRegistry {
    calls: Arc<RwLock<HashMap<String, CallEntry>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a call, refusing it when `max_calls` are already live.
    pub fn register(&self, entry: CallEntry, max_calls: usize) -> Result<(), RegistryError> {
        let mut calls = self.calls.write().unwrap_or_else(PoisonError::into_inner);

        if calls.contains_key(&entry.connection_id) {
            return Err(RegistryError::Duplicate(entry.connection_id));
        }
        if calls.len() >= max_calls {
            return Err(RegistryError::Full(max_calls));
        }

        calls.insert(entry.connection_id.clone(), entry);
        Ok(())
    }

    pub fn remove(&self, connection_id: &str) -> Option<CallEntry> {
        let mut calls = self.calls.write().unwrap_or_else(PoisonError::into_inner);
        calls.remove(connection_id)
    }

    /// Look a call up by the carrier's call id.
    pub fn find(&self, call_sid: &str) -> Option<CallEntry> {
        let calls = self.calls.read().unwrap_or_else(PoisonError::into_inner);
        calls.values().find(|entry| entry.call_sid == call_sid).cloned()
    }

    /// All live calls, oldest first.
    pub fn entries(&self) -> Vec<CallEntry> {
        let calls = self.calls.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<CallEntry> = calls.values().cloned().collect();
        entries.sort_by_key(|entry| entry.started_at);
        entries
    }

    pub fn len(&self) -> usize {
        self.calls.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
