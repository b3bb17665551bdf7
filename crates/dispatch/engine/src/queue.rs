//! Dispatch queue: priority-ordered, mutation-safe work item storage
//!
//! Items are ordered by priority tier, then FIFO by a monotonically
//! increasing enqueue sequence. The queue also watches routing hazards:
//! target collisions are counted and annotated without blocking, cyclic
//! chains are reported as deadlocks, and colliding items can be merged
//! into a single junction item.

use crate::config::QueueConfig;
use chrono::Utc;
use dispatch_types::{
    PriorityTier, QueueError, QueueResult, Route, WorkItem, WorkItemId, META_COLLISION_COUNT,
    META_JUNCTION_SOURCES, TAG_JUNCTION,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Ordering key: higher priority first, then earlier enqueue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct QueueKey {
    priority: PriorityTier,
    sequence: u64,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of a successful enqueue
#[derive(Clone, Debug)]
pub struct Enqueued {
    pub item_id: WorkItemId,
    /// Queued items that already shared the new item's target
    pub collisions: usize,
    /// The lower-priority item evicted to make room, if any
    pub evicted: Option<WorkItem>,
}

/// Point-in-time view of the queue
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    pub size: usize,
    pub capacity: usize,
    pub by_priority: BTreeMap<PriorityTier, usize>,
    pub collisions: u64,
    pub deadlocks: u64,
    pub evictions: u64,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub active_routes: usize,
    pub maintenance: bool,
}

/// Persisted form of a queue snapshot
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueRecord {
    pub capacity: usize,
    /// Queued items in dispatch order
    pub items: Vec<WorkItem>,
    pub collisions: u64,
    pub deadlocks: u64,
    pub evictions: u64,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    #[serde(default)]
    pub active_routes: Vec<(Route, u32)>,
    #[serde(default)]
    pub maintenance: bool,
}

/// Priority-ordered queue of work items
#[derive(Clone, Debug)]
pub struct DispatchQueue {
    capacity: usize,
    items: BTreeMap<QueueKey, WorkItem>,
    /// Work item id → ordering key
    index: HashMap<WorkItemId, QueueKey>,
    /// Target → number of queued items routed to it
    targets: HashMap<String, usize>,
    /// Dequeued routes awaiting completion
    active_routes: HashMap<Route, u32>,
    next_sequence: u64,
    collisions: u64,
    deadlocks: u64,
    evictions: u64,
    total_enqueued: u64,
    total_dequeued: u64,
    maintenance: bool,
}

impl DispatchQueue {
    /// Create an empty queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: BTreeMap::new(),
            index: HashMap::new(),
            targets: HashMap::new(),
            active_routes: HashMap::new(),
            next_sequence: 0,
            collisions: 0,
            deadlocks: 0,
            evictions: 0,
            total_enqueued: 0,
            total_dequeued: 0,
            maintenance: false,
        }
    }

    pub fn with_config(config: &QueueConfig) -> Self {
        Self::new(config.capacity)
    }

    // ── Enqueue / Dequeue ────────────────────────────────────────────

    /// Add an item to the queue.
    ///
    /// At capacity, background items are rejected outright; anything else
    /// evicts the least urgent resident with a strictly lower priority, or
    /// fails with [`QueueError::Overflow`]. Collisions with queued items on
    /// the same target are counted and annotated but never block.
    pub fn enqueue(&mut self, mut item: WorkItem) -> QueueResult<Enqueued> {
        if self.maintenance {
            return Err(QueueError::Maintenance);
        }
        if self.index.contains_key(&item.id) {
            item.id = WorkItemId::generate();
        }

        let mut evicted = None;
        if self.items.len() >= self.capacity {
            if item.priority() == PriorityTier::Background {
                tracing::warn!(item_id = %item.id, "Queue full, background item rejected");
                return Err(QueueError::BackgroundRejected {
                    capacity: self.capacity,
                });
            }
            evicted = Some(self.evict_below(item.priority())?);
        }

        let collisions = self.targets.get(&item.target).copied().unwrap_or(0);
        if collisions > 0 {
            self.collisions += 1;
            item.metadata
                .insert(META_COLLISION_COUNT.into(), collisions.to_string());
            tracing::warn!(
                item_id = %item.id,
                target_name = %item.target,
                collisions,
                "Target collision on enqueue"
            );
        }

        let key = QueueKey {
            priority: item.priority(),
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.total_enqueued += 1;
        item.enqueued_at = Utc::now();

        let item_id = item.id.clone();
        tracing::debug!(
            item_id = %item_id,
            priority = %key.priority,
            route = %item.route(),
            "Work item enqueued"
        );
        self.insert(key, item);

        Ok(Enqueued {
            item_id,
            collisions,
            evicted,
        })
    }

    /// Remove and return the highest-priority, earliest-enqueued item.
    ///
    /// The item's route stays active until [`complete_route`](Self::complete_route).
    pub fn dequeue(&mut self) -> QueueResult<Option<WorkItem>> {
        if self.maintenance {
            return Err(QueueError::Maintenance);
        }
        let Some(key) = self.items.keys().next().copied() else {
            return Ok(None);
        };
        Ok(self.take(key).map(|item| self.activate(item)))
    }

    /// Remove a specific item for immediate processing, marking its route active
    pub fn claim(&mut self, id: &WorkItemId) -> QueueResult<WorkItem> {
        if self.maintenance {
            return Err(QueueError::Maintenance);
        }
        let key = self
            .index
            .get(id)
            .copied()
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        let item = self
            .take(key)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        Ok(self.activate(item))
    }

    /// Clear the active-route marker for an item's `source→target` pair.
    ///
    /// Returns false when the route was not active.
    pub fn complete_route(&mut self, item: &WorkItem) -> bool {
        let route = item.route();
        match self.active_routes.get_mut(&route) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.active_routes.remove(&route);
                true
            }
            None => false,
        }
    }

    /// The item `dequeue` would return next
    pub fn peek(&self) -> Option<&WorkItem> {
        self.items.values().next()
    }

    // ── Routing Hazards ──────────────────────────────────────────────

    /// True iff both items route to the same target. Counts the collision.
    pub fn detect_collision(&mut self, a: &WorkItem, b: &WorkItem) -> bool {
        let collides = a.target == b.target;
        if collides {
            self.collisions += 1;
        }
        collides
    }

    /// True if the chain repeats a `source→target` pair, or routes back to
    /// a source visited earlier in the chain.
    pub fn detect_cycle(&self, chain: &[WorkItem]) -> bool {
        find_cycle(chain).is_some()
    }

    /// Like [`detect_cycle`](Self::detect_cycle), but reports a cycle as
    /// [`QueueError::DeadlockDetected`] and counts it.
    pub fn check_cycle(&mut self, chain: &[WorkItem]) -> QueueResult<()> {
        match find_cycle(chain) {
            Some(route) => {
                self.deadlocks += 1;
                tracing::warn!(route = %route, "Routing deadlock detected");
                Err(QueueError::DeadlockDetected(route.to_string()))
            }
            None => Ok(()),
        }
    }

    /// Merge items colliding on one target into a single junction item.
    ///
    /// The junction's source joins every original source with `+`, its tags
    /// are the union plus `junction`, its charge is the maximum, and the
    /// merged item ids are recorded in metadata.
    pub fn merge_into_junction(items: &[WorkItem]) -> QueueResult<WorkItem> {
        let first = items.first().ok_or(QueueError::EmptyJunction)?;
        if let Some(stray) = items.iter().find(|i| i.target != first.target) {
            return Err(QueueError::MismatchedJunction {
                expected: first.target.clone(),
                found: stray.target.clone(),
            });
        }

        let mut sources: Vec<&str> = Vec::new();
        for item in items {
            if !sources.contains(&item.source.as_str()) {
                sources.push(&item.source);
            }
        }
        let charge = items.iter().map(WorkItem::charge).max().unwrap_or(0);
        let depth = items.iter().map(|i| i.depth).max().unwrap_or(0);
        let ids: Vec<&str> = items.iter().map(|i| i.id.0.as_str()).collect();

        let junction = WorkItem::new(sources.join("+"), first.target.clone(), charge)
            .with_tags(items.iter().flat_map(|i| i.tags().iter().cloned()))
            .with_tag(TAG_JUNCTION)
            .with_depth(depth)
            .with_metadata(META_JUNCTION_SOURCES, ids.join(","));

        tracing::debug!(
            junction_id = %junction.id,
            target_name = %junction.target,
            merged = items.len(),
            "Colliding items merged into junction"
        );
        Ok(junction)
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Pause enqueue and dequeue without dropping queued items
    pub fn enter_maintenance(&mut self) {
        self.maintenance = true;
        tracing::info!(queued = self.items.len(), "Dispatch queue entered maintenance");
    }

    pub fn exit_maintenance(&mut self) {
        self.maintenance = false;
        tracing::info!(queued = self.items.len(), "Dispatch queue left maintenance");
    }

    pub fn is_in_maintenance(&self) -> bool {
        self.maintenance
    }

    // ── Query ────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queued items in dispatch order
    pub fn items(&self) -> Vec<&WorkItem> {
        self.items.values().collect()
    }

    pub fn collision_count(&self) -> u64 {
        self.collisions
    }

    pub fn deadlock_count(&self) -> u64 {
        self.deadlocks
    }

    pub fn is_route_active(&self, route: &Route) -> bool {
        self.active_routes.contains_key(route)
    }

    pub fn state(&self) -> QueueState {
        let mut by_priority: BTreeMap<PriorityTier, usize> =
            PriorityTier::ALL.iter().map(|tier| (*tier, 0)).collect();
        for key in self.items.keys() {
            *by_priority.entry(key.priority).or_default() += 1;
        }

        QueueState {
            size: self.items.len(),
            capacity: self.capacity,
            by_priority,
            collisions: self.collisions,
            deadlocks: self.deadlocks,
            evictions: self.evictions,
            total_enqueued: self.total_enqueued,
            total_dequeued: self.total_dequeued,
            active_routes: self.active_routes.len(),
            maintenance: self.maintenance,
        }
    }

    // ── Persistence ──────────────────────────────────────────────────

    pub fn to_record(&self) -> QueueResult<serde_json::Value> {
        let mut active_routes: Vec<(Route, u32)> = self
            .active_routes
            .iter()
            .map(|(route, count)| (route.clone(), *count))
            .collect();
        active_routes.sort();

        let record = QueueRecord {
            capacity: self.capacity,
            items: self.items.values().cloned().collect(),
            collisions: self.collisions,
            deadlocks: self.deadlocks,
            evictions: self.evictions,
            total_enqueued: self.total_enqueued,
            total_dequeued: self.total_dequeued,
            active_routes,
            maintenance: self.maintenance,
        };
        serde_json::to_value(record).map_err(|e| QueueError::Record(e.to_string()))
    }

    /// Restore a queue snapshot. Dispatch order is preserved.
    pub fn from_record(value: &serde_json::Value) -> QueueResult<Self> {
        let record: QueueRecord = serde_json::from_value(value.clone())
            .map_err(|e| QueueError::Record(e.to_string()))?;

        let mut queue = Self::new(record.capacity);
        for item in record.items {
            let key = QueueKey {
                priority: item.priority(),
                sequence: queue.next_sequence,
            };
            queue.next_sequence += 1;
            queue.insert(key, item);
        }
        queue.active_routes = record.active_routes.into_iter().collect();
        queue.collisions = record.collisions;
        queue.deadlocks = record.deadlocks;
        queue.evictions = record.evictions;
        queue.total_enqueued = record.total_enqueued;
        queue.total_dequeued = record.total_dequeued;
        queue.maintenance = record.maintenance;
        Ok(queue)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn insert(&mut self, key: QueueKey, item: WorkItem) {
        *self.targets.entry(item.target.clone()).or_default() += 1;
        self.index.insert(item.id.clone(), key);
        self.items.insert(key, item);
    }

    fn take(&mut self, key: QueueKey) -> Option<WorkItem> {
        let item = self.items.remove(&key)?;
        self.index.remove(&item.id);
        if let Some(count) = self.targets.get_mut(&item.target) {
            *count -= 1;
            if *count == 0 {
                self.targets.remove(&item.target);
            }
        }
        Some(item)
    }

    fn activate(&mut self, mut item: WorkItem) -> WorkItem {
        item.processed_at = Some(Utc::now());
        *self.active_routes.entry(item.route()).or_default() += 1;
        self.total_dequeued += 1;
        item
    }

    /// Evict the least urgent item strictly below `priority`
    fn evict_below(&mut self, priority: PriorityTier) -> QueueResult<WorkItem> {
        let victim = self
            .items
            .keys()
            .next_back()
            .copied()
            .filter(|key| key.priority < priority)
            .ok_or(QueueError::Overflow {
                capacity: self.capacity,
                priority,
            })?;

        let evicted = self.take(victim).ok_or(QueueError::Overflow {
            capacity: self.capacity,
            priority,
        })?;
        self.evictions += 1;
        tracing::warn!(
            evicted_id = %evicted.id,
            evicted_priority = %evicted.priority(),
            "Queue full, evicted lower-priority item"
        );
        Ok(evicted)
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::with_config(&QueueConfig::default())
    }
}

/// First route that closes a cycle, if any
fn find_cycle(chain: &[WorkItem]) -> Option<Route> {
    let mut seen_routes = HashSet::new();
    let mut seen_sources: HashSet<&str> = HashSet::new();

    for item in chain {
        let route = item.route();
        seen_sources.insert(item.source.as_str());
        if seen_sources.contains(item.target.as_str()) || !seen_routes.insert(route.clone()) {
            return Some(route);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_types::TAG_EMERGENCY;
    use proptest::prelude::*;

    fn item(source: &str, target: &str, charge: u8) -> WorkItem {
        WorkItem::new(source, target, charge)
    }

    #[test]
    fn test_priority_order() {
        let mut queue = DispatchQueue::new(10);
        queue.enqueue(item("a", "t1", 30)).unwrap();
        queue.enqueue(item("b", "t2", 80)).unwrap();
        queue
            .enqueue(item("c", "t3", 90).with_tag(TAG_EMERGENCY))
            .unwrap();

        let order: Vec<_> = (0..3)
            .map(|_| queue.dequeue().unwrap().unwrap().priority())
            .collect();
        assert_eq!(
            order,
            vec![
                PriorityTier::Critical,
                PriorityTier::High,
                PriorityTier::Background
            ]
        );
        assert!(queue.dequeue().unwrap().is_none());
    }

    #[test]
    fn test_fifo_within_tier() {
        let mut queue = DispatchQueue::new(10);
        let first = queue.enqueue(item("a", "x", 55)).unwrap().item_id;
        let second = queue.enqueue(item("b", "y", 55)).unwrap().item_id;

        assert_eq!(queue.dequeue().unwrap().unwrap().id, first);
        assert_eq!(queue.dequeue().unwrap().unwrap().id, second);
    }

    #[test]
    fn test_collision_counted_once_and_annotated() {
        let mut queue = DispatchQueue::new(10);
        queue.enqueue(item("a", "shared", 40)).unwrap();
        let outcome = queue.enqueue(item("b", "shared", 40)).unwrap();

        assert_eq!(outcome.collisions, 1);
        assert_eq!(queue.state().collisions, 1);
        assert_eq!(queue.len(), 2);
        let annotated = queue.items()[1];
        assert_eq!(annotated.metadata.get(META_COLLISION_COUNT).unwrap(), "1");
    }

    #[test]
    fn test_overflow_rules() {
        let mut queue = DispatchQueue::new(2);
        queue.enqueue(item("a", "t1", 10)).unwrap();
        queue.enqueue(item("b", "t2", 60)).unwrap();

        let rejected = queue.enqueue(item("c", "t3", 20));
        assert!(matches!(rejected, Err(QueueError::BackgroundRejected { .. })));

        let outcome = queue.enqueue(item("d", "t4", 75)).unwrap();
        let evicted = outcome.evicted.unwrap();
        assert_eq!(evicted.source, "a");
        assert_eq!(queue.len(), 2);

        queue.enqueue(item("e", "t5", 80)).unwrap();
        let overflow = queue.enqueue(item("f", "t6", 72));
        assert!(matches!(overflow, Err(QueueError::Overflow { .. })));
        assert_eq!(queue.state().evictions, 2);
    }

    #[test]
    fn test_detect_collision() {
        let mut queue = DispatchQueue::new(4);
        assert!(queue.detect_collision(&item("a", "t", 0), &item("b", "t", 0)));
        assert!(!queue.detect_collision(&item("a", "t", 0), &item("b", "u", 0)));
        assert_eq!(queue.collision_count(), 1);
    }

    #[test]
    fn test_cycle_detection() {
        let mut queue = DispatchQueue::new(4);
        let cyclic = vec![item("A", "B", 0), item("B", "C", 0), item("C", "A", 0)];
        let acyclic = vec![item("A", "B", 0), item("B", "C", 0), item("C", "D", 0)];
        let repeated = vec![item("A", "B", 0), item("A", "B", 0)];

        assert!(queue.detect_cycle(&cyclic));
        assert!(!queue.detect_cycle(&acyclic));
        assert!(queue.detect_cycle(&repeated));

        assert!(matches!(
            queue.check_cycle(&cyclic),
            Err(QueueError::DeadlockDetected(_))
        ));
        assert!(queue.check_cycle(&acyclic).is_ok());
        assert_eq!(queue.state().deadlocks, 1);
    }

    #[test]
    fn test_merge_into_junction() {
        let a = item("p1", "sink", 40).with_tag("x");
        let b = item("p2", "sink", 77).with_tag("y");
        let junction = DispatchQueue::merge_into_junction(&[a.clone(), b.clone()]).unwrap();

        assert_eq!(junction.source, "p1+p2");
        assert_eq!(junction.target, "sink");
        assert_eq!(junction.charge(), 77);
        assert!(junction.has_tag("x") && junction.has_tag("y") && junction.has_tag(TAG_JUNCTION));
        assert_eq!(junction.priority(), PriorityTier::High);
        assert_eq!(
            junction.metadata.get(META_JUNCTION_SOURCES).unwrap(),
            &format!("{},{}", a.id, b.id)
        );

        assert!(matches!(
            DispatchQueue::merge_into_junction(&[]),
            Err(QueueError::EmptyJunction)
        ));
        assert!(matches!(
            DispatchQueue::merge_into_junction(&[a, item("p3", "elsewhere", 0)]),
            Err(QueueError::MismatchedJunction { .. })
        ));
    }

    #[test]
    fn test_maintenance_pauses_without_loss() {
        let mut queue = DispatchQueue::new(4);
        queue.enqueue(item("a", "t", 60)).unwrap();
        queue.enter_maintenance();

        assert!(matches!(
            queue.enqueue(item("b", "t", 60)),
            Err(QueueError::Maintenance)
        ));
        assert!(matches!(queue.dequeue(), Err(QueueError::Maintenance)));
        assert_eq!(queue.len(), 1);

        queue.exit_maintenance();
        assert!(queue.dequeue().unwrap().is_some());
    }

    #[test]
    fn test_active_routes() {
        let mut queue = DispatchQueue::new(4);
        queue.enqueue(item("a", "b", 60)).unwrap();
        let taken = queue.dequeue().unwrap().unwrap();
        assert!(taken.processed_at.is_some());
        assert!(queue.is_route_active(&taken.route()));
        assert_eq!(queue.state().active_routes, 1);

        assert!(queue.complete_route(&taken));
        assert!(!queue.complete_route(&taken));
        assert_eq!(queue.state().active_routes, 0);
    }

    #[test]
    fn test_claim_specific_item() {
        let mut queue = DispatchQueue::new(4);
        queue.enqueue(item("a", "b", 95)).unwrap();
        let id = queue.enqueue(item("c", "d", 10)).unwrap().item_id;

        let claimed = queue.claim(&id).unwrap();
        assert_eq!(claimed.source, "c");
        assert_eq!(queue.len(), 1);
        assert!(matches!(queue.claim(&id), Err(QueueError::NotFound(_))));
    }

    #[test]
    fn test_state_counts() {
        let mut queue = DispatchQueue::new(8);
        queue.enqueue(item("a", "t1", 90)).unwrap();
        queue.enqueue(item("b", "t2", 60)).unwrap();
        queue.enqueue(item("c", "t3", 61)).unwrap();
        queue.dequeue().unwrap();

        let state = queue.state();
        assert_eq!(state.size, 2);
        assert_eq!(state.by_priority[&PriorityTier::Standard], 2);
        assert_eq!(state.by_priority[&PriorityTier::Critical], 0);
        assert_eq!(state.total_enqueued, 3);
        assert_eq!(state.total_dequeued, 1);
        assert!(!state.maintenance);
    }

    #[test]
    fn test_record_round_trip_keeps_order() {
        let mut queue = DispatchQueue::new(8);
        queue.enqueue(item("a", "t", 55)).unwrap();
        queue.enqueue(item("b", "t", 95)).unwrap();
        queue.enqueue(item("c", "u", 55)).unwrap();
        queue.enter_maintenance();

        let record = queue.to_record().unwrap();
        let mut restored = DispatchQueue::from_record(&record).unwrap();
        assert_eq!(restored.state(), queue.state());

        restored.exit_maintenance();
        let sources: Vec<_> = (0..3)
            .map(|_| restored.dequeue().unwrap().unwrap().source)
            .collect();
        assert_eq!(sources, vec!["b", "a", "c"]);
    }

    proptest! {
        #[test]
        fn property_dequeue_is_priority_then_fifo(charges in proptest::collection::vec(0u8..=100, 1..40)) {
            let mut queue = DispatchQueue::new(64);
            let mut expected = Vec::new();
            for (position, charge) in charges.iter().enumerate() {
                let queued = WorkItem::new(format!("s{}", position), format!("t{}", position), *charge);
                expected.push((std::cmp::Reverse(queued.priority()), position));
                queue.enqueue(queued).unwrap();
            }
            expected.sort();

            for (_, position) in expected {
                let next = queue.dequeue().unwrap().unwrap();
                prop_assert_eq!(next.source, format!("s{}", position));
            }
        }
    }
}
