//! Work items: queued units of routed work
//!
//! A WorkItem routes from a `source` to a `target`. Its priority tier is
//! derived from charge and tags when the item is built and is never
//! recomputed on its own, so charge and tags are only settable through
//! the builder methods.

use crate::Request;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Tag selecting the Critical priority tier and the Emergency depth tier
pub const TAG_EMERGENCY: &str = "emergency";
/// Tag selecting the Extended depth tier
pub const TAG_EXTENDED_LOOP: &str = "extended-loop";
/// Tag selecting the High priority tier
pub const TAG_LOOP: &str = "loop";
/// Marker tag carried by synthesized junction items
pub const TAG_JUNCTION: &str = "junction";

/// Upper bound of the charge scale
pub const MAX_CHARGE: u8 = 100;

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for a work item
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkItemId(pub String);

impl WorkItemId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Priority Tier ────────────────────────────────────────────────────

/// Dispatch priority, ordered from lowest to highest
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    Background,
    Standard,
    High,
    Critical,
}

impl PriorityTier {
    /// All tiers, highest first
    pub const ALL: [PriorityTier; 4] = [
        PriorityTier::Critical,
        PriorityTier::High,
        PriorityTier::Standard,
        PriorityTier::Background,
    ];

    /// Derive the tier for a charge and tag set.
    ///
    /// Critical: charge ≥ 86 or an `emergency` tag.
    /// High: a `loop` tag or charge ≥ 71.
    /// Standard: charge 51–70.
    /// Background: everything else.
    pub fn classify(charge: u8, tags: &BTreeSet<String>) -> Self {
        if charge >= 86 || tags.contains(TAG_EMERGENCY) {
            PriorityTier::Critical
        } else if tags.contains(TAG_LOOP) || charge >= 71 {
            PriorityTier::High
        } else if charge >= 51 {
            PriorityTier::Standard
        } else {
            PriorityTier::Background
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PriorityTier::Critical => "critical",
            PriorityTier::High => "high",
            PriorityTier::Standard => "standard",
            PriorityTier::Background => "background",
        }
    }
}

impl std::fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Work Item ────────────────────────────────────────────────────────

/// A queued, priority-tagged unit of work
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier
    pub id: WorkItemId,
    /// Where the work originates
    pub source: String,
    /// Where the work is routed to
    pub target: String,
    tags: BTreeSet<String>,
    charge: u8,
    priority: PriorityTier,
    /// Current recursion depth
    pub depth: u32,
    /// When the item was created or last enqueued
    pub enqueued_at: DateTime<Utc>,
    /// When the item was handed out for processing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// Bookkeeping annotations
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl WorkItem {
    /// Create a new work item. Charge is clamped to 0–100.
    pub fn new(source: impl Into<String>, target: impl Into<String>, charge: u8) -> Self {
        let charge = charge.min(MAX_CHARGE);
        let tags = BTreeSet::new();
        Self {
            id: WorkItemId::generate(),
            source: source.into(),
            target: target.into(),
            priority: PriorityTier::classify(charge, &tags),
            tags,
            charge,
            depth: 0,
            enqueued_at: Utc::now(),
            processed_at: None,
            metadata: HashMap::new(),
        }
    }

    /// Build the work item for a validated request.
    ///
    /// The request's symbol becomes the route source and its flags become
    /// tags. Everything needed to rebuild the request is kept in metadata.
    pub fn from_request(request: &Request) -> Self {
        let mut item = Self::new(request.symbol.clone(), request.target.clone(), request.charge)
            .with_tags(request.flags.iter().cloned())
            .with_depth(request.depth);

        item.metadata
            .insert(META_REQUEST_ID.into(), request.id.0.clone());
        item.metadata
            .insert(META_SYMBOL.into(), request.symbol.clone());
        item.metadata.insert(META_MODE.into(), request.mode.clone());
        item.metadata
            .insert(META_DEPTH_LEVEL.into(), request.depth_level.to_string());
        item.metadata.insert(
            META_OUTPUT_KIND.into(),
            request.expected_output_kind.clone(),
        );
        if let Some(timeout) = request.timeout_ms {
            item.metadata
                .insert(META_TIMEOUT_MS.into(), timeout.to_string());
        }
        item
    }

    pub fn with_id(mut self, id: WorkItemId) -> Self {
        self.id = id;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self.priority = PriorityTier::classify(self.charge, &self.tags);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self.priority = PriorityTier::classify(self.charge, &self.tags);
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    // ── Query methods ────────────────────────────────────────────────

    pub fn charge(&self) -> u8 {
        self.charge
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// The derived dispatch priority
    pub fn priority(&self) -> PriorityTier {
        self.priority
    }

    /// The `source→target` pair this item routes along
    pub fn route(&self) -> Route {
        Route::new(self.source.clone(), self.target.clone())
    }
}

/// Metadata key holding the originating request id
pub const META_REQUEST_ID: &str = "request_id";
/// Metadata key holding the request symbol
pub const META_SYMBOL: &str = "symbol";
/// Metadata key holding the request mode
pub const META_MODE: &str = "mode";
/// Metadata key holding the request depth level
pub const META_DEPTH_LEVEL: &str = "depth_level";
/// Metadata key holding the expected output kind
pub const META_OUTPUT_KIND: &str = "expected_output_kind";
/// Metadata key holding the request timeout
pub const META_TIMEOUT_MS: &str = "timeout_ms";
/// Metadata key annotated on colliding items
pub const META_COLLISION_COUNT: &str = "collision_count";
/// Metadata key listing the items merged into a junction
pub const META_JUNCTION_SOURCES: &str = "junction_sources";

// ── Route ────────────────────────────────────────────────────────────

/// A directed `source→target` pair
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Route {
    pub source: String,
    pub target: String,
}

impl Route {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}→{}", self.source, self.target)
    }
}
