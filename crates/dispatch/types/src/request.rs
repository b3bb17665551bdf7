//! Requests: parsed, immutable units of work
//!
//! Requests are produced by an external parser and consumed by the
//! dispatcher. They are converted into work items on enqueue and can be
//! rebuilt from a work item's metadata when draining the queue.

use crate::{
    WorkItem, META_DEPTH_LEVEL, META_MODE, META_OUTPUT_KIND, META_REQUEST_ID, META_SYMBOL,
    META_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Mode used when a rebuilt request carries none
pub const DEFAULT_MODE: &str = "default";

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for a request
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Depth Level ──────────────────────────────────────────────────────

/// How thoroughly the target should process the request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthLevel {
    Light,
    #[default]
    Standard,
    Full,
}

impl std::fmt::Display for DepthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepthLevel::Light => f.write_str("light"),
            DepthLevel::Standard => f.write_str("standard"),
            DepthLevel::Full => f.write_str("full"),
        }
    }
}

impl std::str::FromStr for DepthLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(DepthLevel::Light),
            "standard" => Ok(DepthLevel::Standard),
            "full" => Ok(DepthLevel::Full),
            other => Err(format!("unknown depth level '{}'", other)),
        }
    }
}

// ── Request ──────────────────────────────────────────────────────────

/// A parsed request to route work to a target
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier
    pub id: RequestId,
    /// Capability the request is routed to
    pub target: String,
    /// Reference to the input payload
    pub symbol: String,
    /// Processing mode within the target
    pub mode: String,
    /// Requested processing depth
    pub depth_level: DepthLevel,
    /// The kind of output the caller expects
    #[serde(default)]
    pub expected_output_kind: String,
    /// Free-form flags; they become work item tags
    #[serde(default)]
    pub flags: BTreeSet<String>,
    /// Charge, 0–100
    pub charge: u8,
    /// Recursion depth inherited from a parent dispatch
    #[serde(default)]
    pub depth: u32,
    /// Handler deadline in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Request {
    /// Create a new request for a target and mode
    pub fn new(target: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            id: RequestId::generate(),
            target: target.into(),
            symbol: String::new(),
            mode: mode.into(),
            depth_level: DepthLevel::default(),
            expected_output_kind: String::new(),
            flags: BTreeSet::new(),
            charge: 0,
            depth: 0,
            timeout_ms: None,
        }
    }

    /// Create a nested request issued while processing `parent`.
    ///
    /// The child inherits the parent's depth; the dispatcher has already
    /// incremented it before the handler runs.
    pub fn child_of(parent: &WorkItem, target: impl Into<String>, mode: impl Into<String>) -> Self {
        Self::new(target, mode)
            .with_symbol(parent.target.clone())
            .with_charge(parent.charge())
            .with_flags(parent.tags().iter().cloned())
            .with_depth(parent.depth)
    }

    /// Rebuild the request a work item was created from.
    ///
    /// Falls back to the item's own fields where metadata is missing, so
    /// items that never came from a request still convert.
    pub fn from_item(item: &WorkItem) -> Self {
        let meta = |key: &str| item.metadata.get(key).cloned();
        Self {
            id: RequestId::new(meta(META_REQUEST_ID).unwrap_or_else(|| item.id.0.clone())),
            target: item.target.clone(),
            symbol: meta(META_SYMBOL).unwrap_or_else(|| item.source.clone()),
            mode: meta(META_MODE).unwrap_or_else(|| DEFAULT_MODE.to_string()),
            depth_level: meta(META_DEPTH_LEVEL)
                .and_then(|level| level.parse().ok())
                .unwrap_or_default(),
            expected_output_kind: meta(META_OUTPUT_KIND).unwrap_or_default(),
            flags: item.tags().clone(),
            charge: item.charge(),
            depth: item.depth,
            timeout_ms: meta(META_TIMEOUT_MS).and_then(|t| t.parse().ok()),
        }
    }

    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = id;
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    pub fn with_depth_level(mut self, level: DepthLevel) -> Self {
        self.depth_level = level;
        self
    }

    pub fn with_expected_output(mut self, kind: impl Into<String>) -> Self {
        self.expected_output_kind = kind.into();
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    pub fn with_charge(mut self, charge: u8) -> Self {
        self.charge = charge.min(crate::MAX_CHARGE);
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}
