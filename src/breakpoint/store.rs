//! Breakpoint definitions and the live breakpoint list.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::{FilterError, FilterExpression, MatchOptions};
use crate::message::Message;
use crate::store::{StateStore, BREAKPOINTS};

fn default_true() -> bool {
    true
}

/// A one-shot filter that holds matching responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub filter: String,
    #[serde(default)]
    pub match_case: bool,
    #[serde(default)]
    pub regex: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(skip)]
    compiled: Option<FilterExpression>,
}

impl Breakpoint {
    pub fn new(filter: impl Into<String>) -> Result<Self, FilterError> {
        let mut breakpoint = Self {
            id: Uuid::new_v4(),
            filter: filter.into(),
            match_case: false,
            regex: false,
            enabled: true,
            compiled: None,
        };
        breakpoint.compile()?;
        Ok(breakpoint)
    }

    pub fn options(&self) -> MatchOptions {
        MatchOptions {
            case_sensitive: self.match_case,
            regex: self.regex,
        }
    }

    pub fn compile(&mut self) -> Result<(), FilterError> {
        self.compiled = Some(FilterExpression::compile(&self.filter, self.options())?);
        Ok(())
    }

    /// Enabled, non-empty and matching. Empty filters never hold traffic.
    pub fn matches(&self, message: &Message) -> bool {
        match &self.compiled {
            Some(expr) if self.enabled && !expr.is_empty() => expr.matches(message),
            _ => false,
        }
    }
}

/// The live breakpoint list, persisted on every change.
pub struct BreakpointStore {
    breakpoints: RwLock<Vec<Breakpoint>>,
    state: Option<Arc<dyn StateStore>>,
}

impl BreakpointStore {
    pub fn new() -> Self {
        Self {
            breakpoints: RwLock::new(Vec::new()),
            state: None,
        }
    }

    /// Load the persisted list. Entries whose filter no longer compiles are
    /// kept but never match.
    pub fn with_state(state: Arc<dyn StateStore>) -> Self {
        let mut breakpoints: Vec<Breakpoint> = match state.load(BREAKPOINTS) {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring unreadable persisted breakpoints");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load persisted breakpoints");
                Vec::new()
            }
        };
        for bp in &mut breakpoints {
            if let Err(e) = bp.compile() {
                tracing::warn!(id = %bp.id, filter = %bp.filter, error = %e, "Persisted breakpoint does not compile");
            }
        }
        tracing::info!(count = breakpoints.len(), "Breakpoints loaded");
        Self {
            breakpoints: RwLock::new(breakpoints),
            state: Some(state),
        }
    }

    pub fn list(&self) -> Vec<Breakpoint> {
        self.breakpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the whole list. Nothing changes if any filter is invalid.
    pub fn replace(&self, mut breakpoints: Vec<Breakpoint>) -> Result<Vec<Breakpoint>, FilterError> {
        for bp in &mut breakpoints {
            bp.compile()?;
        }
        *self.breakpoints.write().unwrap_or_else(PoisonError::into_inner) = breakpoints.clone();
        self.persist(&breakpoints);
        tracing::info!(count = breakpoints.len(), "Breakpoints replaced");
        Ok(breakpoints)
    }

    /// Id of the first enabled breakpoint matching `message`, in list order.
    pub fn first_match(&self, message: &Message) -> Option<Uuid> {
        self.breakpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|bp| bp.matches(message))
            .map(|bp| bp.id)
    }

    /// Disarm after use. Returns false if the id is unknown or already off.
    pub fn disarm(&self, id: Uuid) -> bool {
        self.set_enabled(id, false)
    }

    /// Re-arm a breakpoint.
    pub fn enable(&self, id: Uuid) -> bool {
        self.set_enabled(id, true)
    }

    fn set_enabled(&self, id: Uuid, enabled: bool) -> bool {
        let snapshot = {
            let mut list = self.breakpoints.write().unwrap_or_else(PoisonError::into_inner);
            match list.iter_mut().find(|bp| bp.id == id) {
                Some(bp) if bp.enabled != enabled => bp.enabled = enabled,
                _ => return false,
            }
            list.clone()
        };
        self.persist(&snapshot);
        true
    }

    fn persist(&self, breakpoints: &[Breakpoint]) {
        let Some(state) = &self.state else {
            return;
        };
        let result = serde_json::to_value(breakpoints)
            .map_err(|e| e.to_string())
            .and_then(|v| state.save(BREAKPOINTS, &v).map_err(|e| e.to_string()));
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist breakpoints");
        }
    }
}

impl Default for BreakpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BreakpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakpointStore")
            .field("breakpoints", &self.list().len())
            .finish()
    }
}
