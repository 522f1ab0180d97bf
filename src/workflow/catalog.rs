//! # Workflow Catalog
//!
//! Resolves a workflow selector (the `groupId` custom parameter sent by the
//! carrier when the media stream starts) into its ordered steps.
//!
//! ## Catalog File Format (TOML):
//! ```toml
//! [[workflows]]
//! selector = "morning-route"
//!
//! [[workflows.steps]]
//! id = 1
//! prompt_text = "Can you confirm you are driving the 7:30 route today?"
//!
//! [[workflows.steps]]
//! id = 2
//! prompt_text = "Is the bus ready to leave on time?"
//! ```

use crate::workflow::WorkflowStep;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Errors raised while resolving workflows.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowError {
    /// No workflow is registered under this selector
    NotFound(String),

    /// The catalog file could not be read
    Io(String),

    /// The catalog file is not valid TOML or has the wrong shape
    Parse(String),
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::NotFound(selector) => write!(f, "Workflow not found: {}", selector),
            WorkflowError::Io(msg) => write!(f, "Workflow catalog I/O error: {}", msg),
            WorkflowError::Parse(msg) => write!(f, "Workflow catalog parse error: {}", msg),
        }
    }
}

impl std::error::Error for WorkflowError {}

/// Source of workflow steps for a call.
///
/// Lookups are awaited from the connection's actor context, so slow
/// implementations (databases, HTTP services) never block other calls.
#[async_trait]
pub trait WorkflowProvider: Send + Sync {
    async fn get_steps(&self, selector: &str) -> Result<Vec<WorkflowStep>, WorkflowError>;
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    workflows: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    selector: String,
    #[serde(default)]
    steps: Vec<WorkflowStep>,
}

/// In-memory workflow catalog keyed by selector.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    workflows: HashMap<String, Vec<WorkflowStep>>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, WorkflowError> {
        let file: CatalogFile =
            toml::from_str(text).map_err(|e| WorkflowError::Parse(e.to_string()))?;

        let mut catalog = Self::new();
        for entry in file.workflows {
            catalog.insert(entry.selector, entry.steps);
        }
        Ok(catalog)
    }

    /// Load a catalog file. A missing file yields an empty catalog so the
    /// server can still run every call on the fallback greeting/closing pair.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!("Workflow catalog {} not found, starting with no workflows", path.display());
            return Ok(Self::new());
        }

        let text = std::fs::read_to_string(path).map_err(|e| WorkflowError::Io(e.to_string()))?;
        let catalog = Self::from_toml_str(&text)?;
        tracing::info!("Loaded {} workflows from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Register (or replace) a workflow.
    pub fn insert(&mut self, selector: impl Into<String>, steps: Vec<WorkflowStep>) {
        self.workflows.insert(selector.into(), steps);
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

#[async_trait]
impl WorkflowProvider for WorkflowCatalog {
    async fn get_steps(&self, selector: &str) -> Result<Vec<WorkflowStep>, WorkflowError> {
        self.workflows
            .get(selector)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(selector.to_string()))
    }
}
