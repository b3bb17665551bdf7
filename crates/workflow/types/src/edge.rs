//! Branches: conditional edges between steps
//!
//! A branch leaves the step that owns it and names its target step.
//! Targets are plain names resolved against the owning workflow, so a
//! workflow never holds references between its steps.

use crate::{Condition, ConditionExpr};
use dispatch_types::Payload;

/// A conditional edge to another step in the same workflow
#[derive(Clone, Debug)]
pub struct Branch {
    /// Name, unique among the owning step's branches
    pub name: String,
    /// Guard; the branch is taken only when it holds
    pub condition: Condition,
    /// Name of the step to continue at
    pub target_step: String,
    /// Higher priorities are evaluated first
    pub priority: i32,
}

impl Branch {
    pub fn new(
        name: impl Into<String>,
        target_step: impl Into<String>,
        condition: impl Into<Condition>,
    ) -> Self {
        Self {
            name: name.into(),
            condition: condition.into(),
            target_step: target_step.into(),
            priority: 0,
        }
    }

    /// A branch that is always taken when reached
    pub fn unconditional(name: impl Into<String>, target_step: impl Into<String>) -> Self {
        Self::new(name, target_step, ConditionExpr::Always)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn matches(&self, context: &Payload) -> bool {
        self.condition.evaluate(context)
    }
}

/// Pick the first matching branch in descending priority.
///
/// Ties keep declaration order.
pub fn select_branch<'a>(branches: &'a [Branch], context: &Payload) -> Option<&'a Branch> {
    let mut ordered: Vec<&Branch> = branches.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
    ordered.into_iter().find(|branch| branch.matches(context))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_priority_match_wins() {
        let branches = vec![
            Branch::unconditional("low", "a").with_priority(5),
            Branch::unconditional("high", "b").with_priority(10),
        ];
        let chosen = select_branch(&branches, &Payload::new()).unwrap();
        assert_eq!(chosen.name, "high");
        assert_eq!(chosen.target_step, "b");
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let branches = vec![
            Branch::unconditional("first", "a").with_priority(3),
            Branch::unconditional("second", "b").with_priority(3),
        ];
        assert_eq!(select_branch(&branches, &Payload::new()).unwrap().name, "first");
    }

    #[test]
    fn test_non_matching_branches_are_skipped() {
        let branches = vec![
            Branch::new("never", "a", ConditionExpr::Never).with_priority(100),
            Branch::unconditional("fallback", "b"),
        ];
        assert_eq!(
            select_branch(&branches, &Payload::new()).unwrap().name,
            "fallback"
        );
        assert!(select_branch(&branches[..1], &Payload::new()).is_none());
    }
}
