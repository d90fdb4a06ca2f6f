//! Optimistic action tracking and reconciliation.
//!
//! Locally initiated actions (an ingredient dragged into a builder, a pizza
//! pushed toward the oven) become visible immediately as a provisional
//! overlay, while the authoritative [`GameState`] stays untouched until the
//! server confirms. Confirmations match by payload identity — ingredient id,
//! pizza id — because the server does not echo client-generated local ids.
//!
//! Self-healing: any entry that has not been reconciled by the time the next
//! snapshot arrives is dropped wholesale ([`OptimisticTracker::clear`] runs on
//! every snapshot, round reset, and reconnect), so the overlay can never
//! drift permanently from authoritative truth.

use crate::protocol::{GameState, Ingredient, Pizza, PlayerId};

/// What a pending action is trying to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    /// Take an ingredient from the shared pool. With a target player the
    /// ingredient is headed for their shared builder; without one it goes to
    /// the local solo builder.
    Take {
        ingredient: Ingredient,
        target_sid: Option<PlayerId>,
    },
    /// Submit a pizza from the locally staged ingredients.
    Build { ingredients: Vec<Ingredient> },
    /// Move a built pizza into the oven.
    MoveToOven { pizza_id: String },
}

/// A locally initiated, not-yet-confirmed action.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticAction {
    /// Client-local id; never sent to the server.
    pub local_id: u64,
    pub kind: ActionKind,
}

/// Holds pending optimistic actions and reconciles them against
/// confirmations, rejections, and snapshots.
#[derive(Debug, Default)]
pub struct OptimisticTracker {
    next_id: u64,
    pending: Vec<OptimisticAction>,
}

impl OptimisticTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &[OptimisticAction] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn record(&mut self, kind: ActionKind) -> u64 {
        let local_id = self.next_id;
        self.next_id += 1;
        self.pending.push(OptimisticAction { local_id, kind });
        local_id
    }

    /// Record a take; the ingredient disappears from the overlay pool at once.
    pub fn record_take(&mut self, ingredient: Ingredient, target_sid: Option<PlayerId>) -> u64 {
        self.record(ActionKind::Take {
            ingredient,
            target_sid,
        })
    }

    /// Record a pizza submission from the locally staged ingredients.
    pub fn record_build(&mut self, ingredients: Vec<Ingredient>) -> u64 {
        self.record(ActionKind::Build { ingredients })
    }

    /// Record a move of a built pizza toward the oven.
    pub fn record_move_to_oven(&mut self, pizza_id: impl Into<String>) -> u64 {
        self.record(ActionKind::MoveToOven {
            pizza_id: pizza_id.into(),
        })
    }

    // ── Reconciliation ──────────────────────────────────────────────

    /// Confirmation for a take: matched by ingredient id. Re-confirming an
    /// already-reconciled take is a no-op.
    pub fn confirm_take(&mut self, ingredient_id: &str) -> bool {
        self.remove_first(|kind| {
            matches!(kind, ActionKind::Take { ingredient, .. } if ingredient.id == ingredient_id)
        })
    }

    /// Confirmation for a build. The server does not echo the submitted
    /// ingredient ids, so the pizza's recipe counts are matched against
    /// pending builds first, falling back to the oldest pending build.
    pub fn confirm_build(&mut self, pizza: &Pizza) -> bool {
        let by_counts = self.pending.iter().position(|a| {
            matches!(&a.kind, ActionKind::Build { ingredients }
                if crate::protocol::IngredientCounts::tally(ingredients) == pizza.ingredients)
        });
        let pos = by_counts.or_else(|| {
            self.pending
                .iter()
                .position(|a| matches!(a.kind, ActionKind::Build { .. }))
        });
        match pos {
            Some(pos) => {
                self.pending.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Confirmation for an oven move: matched by pizza id.
    pub fn confirm_move(&mut self, pizza_id: &str) -> bool {
        self.remove_first(
            |kind| matches!(kind, ActionKind::MoveToOven { pizza_id: id } if id == pizza_id),
        )
    }

    /// Rejection of the oldest pending take. Returns the removed entry so the
    /// caller can surface the server's message.
    pub fn reject_take(&mut self) -> Option<OptimisticAction> {
        self.take_first(|kind| matches!(kind, ActionKind::Take { .. }))
    }

    /// Rejection of the oldest pending build.
    pub fn reject_build(&mut self) -> Option<OptimisticAction> {
        self.take_first(|kind| matches!(kind, ActionKind::Build { .. }))
    }

    /// Rejection of the oldest pending oven move (e.g. oven at WIP capacity).
    pub fn reject_move(&mut self) -> Option<OptimisticAction> {
        self.take_first(|kind| matches!(kind, ActionKind::MoveToOven { .. }))
    }

    /// Drop every pending entry. Runs on snapshot, round reset, room change,
    /// and reconnect: trust in unconfirmed actions does not survive any of
    /// those.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    // ── Overlay ─────────────────────────────────────────────────────

    /// Render-time merge of the provisional overlay onto a copy of the
    /// authoritative state. The base state itself is never mutated.
    ///
    /// Pending takes remove their ingredient from the prepared pool; pending
    /// oven moves relocate the pizza provisionally. Other players' builders
    /// are never touched — a take targeting another player only clears the
    /// pool until the server confirms.
    pub fn overlay(&self, base: &GameState) -> GameState {
        let mut view = base.clone();
        for action in &self.pending {
            match &action.kind {
                ActionKind::Take { ingredient, .. } => {
                    view.prepared_ingredients.retain(|i| i.id != ingredient.id);
                }
                ActionKind::MoveToOven { pizza_id } => {
                    if let Some(pos) = view.built_pizzas.iter().position(|p| &p.pizza_id == pizza_id)
                    {
                        let pizza = view.built_pizzas.remove(pos);
                        view.oven.push(pizza);
                    }
                }
                ActionKind::Build { .. } => {}
            }
        }
        view
    }

    /// Provisional contents of the local solo builder: takes with no target
    /// player that no pending build has consumed yet.
    pub fn local_builder(&self) -> Vec<Ingredient> {
        let consumed: Vec<&str> = self
            .pending
            .iter()
            .filter_map(|a| match &a.kind {
                ActionKind::Build { ingredients } => Some(ingredients),
                _ => None,
            })
            .flatten()
            .map(|i| i.id.as_str())
            .collect();
        self.pending
            .iter()
            .filter_map(|a| match &a.kind {
                ActionKind::Take {
                    ingredient,
                    target_sid: None,
                } if !consumed.contains(&ingredient.id.as_str()) => Some(ingredient.clone()),
                _ => None,
            })
            .collect()
    }

    fn remove_first(&mut self, pred: impl Fn(&ActionKind) -> bool) -> bool {
        self.take_first(pred).is_some()
    }

    fn take_first(&mut self, pred: impl Fn(&ActionKind) -> bool) -> Option<OptimisticAction> {
        let pos = self.pending.iter().position(|a| pred(&a.kind))?;
        Some(self.pending.remove(pos))
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::{IngredientCounts, IngredientType};

    fn ingredient(id: &str, kind: IngredientType) -> Ingredient {
        Ingredient {
            id: id.into(),
            kind,
        }
    }

    fn pizza(id: &str, counts: IngredientCounts) -> Pizza {
        Pizza {
            pizza_id: id.into(),
            ingredients: counts,
            status: None,
            kind: None,
            order_id: None,
            emoji: None,
        }
    }

    #[test]
    fn take_then_confirm_leaves_zero_pending() {
        let mut tracker = OptimisticTracker::new();
        tracker.record_take(ingredient("i1", IngredientType::Ham), None);
        assert!(tracker.confirm_take("i1"));
        assert!(tracker.is_empty());
        // Reapplying the confirmation is a no-op.
        assert!(!tracker.confirm_take("i1"));
    }

    #[test]
    fn take_then_reject_leaves_zero_pending() {
        let mut tracker = OptimisticTracker::new();
        tracker.record_take(ingredient("i1", IngredientType::Ham), None);
        let rejected = tracker.reject_take();
        assert!(rejected.is_some());
        assert!(tracker.is_empty());
        assert!(tracker.reject_take().is_none());
    }

    #[test]
    fn local_ids_are_distinct() {
        let mut tracker = OptimisticTracker::new();
        let a = tracker.record_take(ingredient("i1", IngredientType::Base), None);
        let b = tracker.record_move_to_oven("p1");
        assert_ne!(a, b);
    }

    #[test]
    fn overlay_hides_taken_ingredient_from_pool() {
        let mut base = GameState::default();
        base.prepared_ingredients
            .push(ingredient("i1", IngredientType::Sauce));
        let mut tracker = OptimisticTracker::new();
        tracker.record_take(ingredient("i1", IngredientType::Sauce), None);

        let view = tracker.overlay(&base);
        assert!(view.prepared_ingredients.is_empty());
        // Authoritative state untouched.
        assert_eq!(base.prepared_ingredients.len(), 1);
        // The ingredient shows in the local builder instead.
        assert_eq!(tracker.local_builder().len(), 1);
    }

    #[test]
    fn targeted_take_never_touches_other_builders() {
        let mut base = GameState::default();
        base.players.insert("other".into(), Default::default());
        base.prepared_ingredients
            .push(ingredient("i1", IngredientType::Ham));
        let mut tracker = OptimisticTracker::new();
        tracker.record_take(
            ingredient("i1", IngredientType::Ham),
            Some("other".to_string()),
        );

        let view = tracker.overlay(&base);
        assert!(view.prepared_ingredients.is_empty());
        assert!(view.players["other"].builder_ingredients.is_empty());
        assert!(tracker.local_builder().is_empty());
    }

    #[test]
    fn build_consumes_local_builder() {
        let mut tracker = OptimisticTracker::new();
        let ing = ingredient("i1", IngredientType::Base);
        tracker.record_take(ing.clone(), None);
        assert_eq!(tracker.local_builder().len(), 1);
        tracker.record_build(vec![ing]);
        assert!(tracker.local_builder().is_empty());
    }

    #[test]
    fn confirm_build_prefers_matching_recipe() {
        let mut tracker = OptimisticTracker::new();
        tracker.record_build(vec![ingredient("a", IngredientType::Base)]);
        tracker.record_build(vec![
            ingredient("b", IngredientType::Base),
            ingredient("c", IngredientType::Sauce),
        ]);
        let counts = IngredientCounts {
            base: 1,
            sauce: 1,
            ..Default::default()
        };
        assert!(tracker.confirm_build(&pizza("p1", counts)));
        // The base-only build is the one left pending.
        assert_eq!(tracker.pending().len(), 1);
        assert!(matches!(
            &tracker.pending()[0].kind,
            ActionKind::Build { ingredients } if ingredients.len() == 1
        ));
    }

    #[test]
    fn confirm_build_falls_back_to_oldest() {
        let mut tracker = OptimisticTracker::new();
        let a = tracker.record_build(vec![ingredient("a", IngredientType::Ham)]);
        tracker.record_build(vec![ingredient("b", IngredientType::Ham)]);
        let counts = IngredientCounts {
            pineapple: 9,
            ..Default::default()
        };
        assert!(tracker.confirm_build(&pizza("p1", counts)));
        assert!(tracker.pending().iter().all(|p| p.local_id != a));
    }

    #[test]
    fn oven_rejection_removes_entry_and_keeps_oven_intact() {
        let mut base = GameState::default();
        for id in ["p1", "p2", "p3"] {
            base.oven.push(pizza(id, Default::default()));
        }
        base.built_pizzas.push(pizza("p4", Default::default()));

        let mut tracker = OptimisticTracker::new();
        tracker.record_move_to_oven("p4");
        // Oven at WIP capacity — server rejects.
        let rejected = tracker.reject_move();
        assert!(rejected.is_some());
        assert!(tracker.is_empty());

        let view = tracker.overlay(&base);
        assert_eq!(view.oven.len(), 3);
        assert_eq!(view.built_pizzas.len(), 1);
    }

    #[test]
    fn move_overlay_relocates_pizza() {
        let mut base = GameState::default();
        base.built_pizzas.push(pizza("p1", Default::default()));
        let mut tracker = OptimisticTracker::new();
        tracker.record_move_to_oven("p1");
        let view = tracker.overlay(&base);
        assert!(view.built_pizzas.is_empty());
        assert_eq!(view.oven.len(), 1);

        assert!(tracker.confirm_move("p1"));
        assert!(tracker.is_empty());
        assert!(!tracker.confirm_move("p1"));
    }

    #[test]
    fn clear_drops_everything() {
        let mut tracker = OptimisticTracker::new();
        tracker.record_take(ingredient("i1", IngredientType::Base), None);
        tracker.record_move_to_oven("p1");
        tracker.clear();
        assert!(tracker.is_empty());
    }
}
