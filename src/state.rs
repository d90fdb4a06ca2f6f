//! Authoritative game-state store: snapshot replace + delta merge.
//!
//! [`StateStore`] owns the single authoritative [`GameState`] for the current
//! room membership. Everything else in the crate reads it through
//! [`StateStore::current`] or the subscription mechanism and never mutates it
//! directly — including the optimistic layer, which keeps its overlay as a
//! disjoint structure merged only at render time.
//!
//! Ordering rules:
//!
//! - A snapshot replaces all state atomically; subscribers observe a single
//!   update, never a partial view.
//! - A delta merges only the fields it carries, field-wise last-write-wins in
//!   arrival order.
//! - Deltas arriving before the first snapshot are buffered and then discarded
//!   once a snapshot supersedes them: a delta with no base is meaningless and
//!   must not crash the store.

use tracing::debug;

use crate::protocol::{
    GameState, GameStateDelta, Ingredient, Order, OvenSwitch, Phase, Pizza, PlayerId,
};

/// Change listener invoked synchronously after each successful apply.
///
/// Listeners must be idempotent renderers: an apply that leaves the state
/// content unchanged may still notify.
pub type Listener = Box<dyn FnMut(&GameState) + Send>;

/// Holds the authoritative snapshot and merges incremental updates onto it.
pub struct StateStore {
    state: Option<GameState>,
    /// Deltas received before the first snapshot. Never applied — discarded
    /// when the snapshot that supersedes them arrives.
    early_deltas: Vec<GameStateDelta>,
    listeners: Vec<Listener>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            state: None,
            early_deltas: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// The latest merged view, or `None` before the first snapshot.
    pub fn current(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    /// Register a listener; invoked synchronously, in subscription order,
    /// after each successful apply.
    pub fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    /// Replace the entire authoritative state atomically.
    pub fn apply_snapshot(&mut self, snapshot: GameState) {
        if !self.early_deltas.is_empty() {
            debug!(
                count = self.early_deltas.len(),
                "discarding deltas that preceded the first snapshot"
            );
            self.early_deltas.clear();
        }
        self.state = Some(snapshot);
        self.notify();
    }

    /// Merge only the fields present in `delta`, leaving others untouched.
    ///
    /// Before the first snapshot the delta is buffered (and later discarded)
    /// instead of applied.
    pub fn apply_delta(&mut self, delta: GameStateDelta) {
        let Some(state) = self.state.as_mut() else {
            debug!("buffering delta received before first snapshot");
            self.early_deltas.push(delta);
            return;
        };
        merge(state, delta);
        self.notify();
    }

    // ── Narrow event mutators ───────────────────────────────────────
    //
    // Each mirrors one incremental server event. All are no-ops before the
    // first snapshot and notify subscribers on success.

    /// A new round began: set round/phase/orders and drop per-round material,
    /// mirroring the server-side reset that precedes `round_started`.
    pub fn round_started(&mut self, round: u32, customer_orders: Vec<Order>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.round = round;
        state.current_phase = Phase::Round;
        state.customer_orders = customer_orders;
        state.prepared_ingredients.clear();
        state.built_pizzas.clear();
        state.oven.clear();
        state.completed_pizzas.clear();
        state.wasted_pizzas.clear();
        state.oven_on = false;
        for builder in state.players.values_mut() {
            builder.builder_ingredients.clear();
        }
        self.notify();
    }

    /// The round ended; the room enters debrief.
    pub fn round_ended(&mut self) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.current_phase = Phase::Debrief;
        self.notify();
    }

    /// An ingredient landed in the shared pool.
    pub fn ingredient_prepared(&mut self, ingredient: Ingredient) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.prepared_ingredients.iter().any(|i| i.id == ingredient.id) {
            return;
        }
        state.prepared_ingredients.push(ingredient);
        self.notify();
    }

    /// An ingredient left the shared pool; with a target, it moved into that
    /// player's shared builder.
    pub fn ingredient_removed(&mut self, ingredient_id: &str, target_sid: Option<&PlayerId>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let Some(pos) = state
            .prepared_ingredients
            .iter()
            .position(|i| i.id == ingredient_id)
        else {
            return;
        };
        let taken = state.prepared_ingredients.remove(pos);
        if let Some(builder) = target_sid.and_then(|sid| state.players.get_mut(sid)) {
            builder.builder_ingredients.push(taken);
        }
        self.notify();
    }

    /// A pizza was built into the "built" pool.
    pub fn pizza_built(&mut self, pizza: Pizza) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.built_pizzas.iter().any(|p| p.pizza_id == pizza.pizza_id) {
            return;
        }
        state.built_pizzas.push(pizza);
        self.notify();
    }

    /// A pizza moved from the built pool into the oven.
    pub fn pizza_moved_to_oven(&mut self, pizza: Pizza) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.built_pizzas.retain(|p| p.pizza_id != pizza.pizza_id);
        if state.oven.iter().any(|p| p.pizza_id == pizza.pizza_id) {
            return;
        }
        state.oven.push(pizza);
        self.notify();
    }

    /// New customer orders arrived (round 3).
    pub fn orders_added(&mut self, orders: Vec<Order>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        for order in orders {
            if !state.customer_orders.iter().any(|o| o.id == order.id) {
                state.customer_orders.push(order);
            }
        }
        self.notify();
    }

    /// A customer order was fulfilled and leaves the board.
    pub fn order_fulfilled(&mut self, order_id: &str) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.customer_orders.retain(|o| o.id != order_id);
        self.notify();
    }

    /// The oven switch flipped. Baked pizzas resolve server-side and arrive
    /// via a later snapshot or delta.
    pub fn oven_toggled(&mut self, switch: OvenSwitch) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.oven_on = matches!(switch, OvenSwitch::On);
        if !state.oven_on {
            state.oven.clear();
        }
        self.notify();
    }

    /// A shared builder was emptied after its pizza was submitted.
    pub fn clear_player_builder(&mut self, player_sid: &PlayerId) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if let Some(builder) = state.players.get_mut(player_sid) {
            builder.builder_ingredients.clear();
        }
        self.notify();
    }

    /// Drop all state, returning the store to its pre-snapshot condition.
    /// Used when the room expires or the user leaves it.
    pub fn reset(&mut self) {
        self.state = None;
        self.early_deltas.clear();
    }

    fn notify(&mut self) {
        if let Some(state) = &self.state {
            for listener in &mut self.listeners {
                listener(state);
            }
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("has_snapshot", &self.state.is_some())
            .field("buffered_deltas", &self.early_deltas.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Field-wise merge: present delta fields replace, absent fields are kept.
fn merge(state: &mut GameState, delta: GameStateDelta) {
    let GameStateDelta {
        round,
        max_rounds,
        current_phase,
        players,
        prepared_ingredients,
        built_pizzas,
        oven,
        completed_pizzas,
        wasted_pizzas,
        customer_orders,
        oven_on,
    } = delta;
    if let Some(v) = round {
        state.round = v;
    }
    if let Some(v) = max_rounds {
        state.max_rounds = v;
    }
    if let Some(v) = current_phase {
        state.current_phase = v;
    }
    if let Some(v) = players {
        state.players = v;
    }
    if let Some(v) = prepared_ingredients {
        state.prepared_ingredients = v;
    }
    if let Some(v) = built_pizzas {
        state.built_pizzas = v;
    }
    if let Some(v) = oven {
        state.oven = v;
    }
    if let Some(v) = completed_pizzas {
        state.completed_pizzas = v;
    }
    if let Some(v) = wasted_pizzas {
        state.wasted_pizzas = v;
    }
    if let Some(v) = customer_orders {
        state.customer_orders = v;
    }
    if let Some(v) = oven_on {
        state.oven_on = v;
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
    use crate::protocol::{IngredientType, PlayerBuilder};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ingredient(id: &str, kind: IngredientType) -> Ingredient {
        Ingredient {
            id: id.into(),
            kind,
        }
    }

    fn pizza(id: &str) -> Pizza {
        Pizza {
            pizza_id: id.into(),
            ingredients: Default::default(),
            status: None,
            kind: None,
            order_id: None,
            emoji: None,
        }
    }

    fn snapshot() -> GameState {
        let mut state = GameState {
            round: 1,
            current_phase: Phase::Round,
            ..GameState::default()
        };
        state
            .players
            .insert("sid-1".into(), PlayerBuilder::default());
        state
            .prepared_ingredients
            .push(ingredient("i1", IngredientType::Base));
        state
    }

    #[test]
    fn delta_before_snapshot_is_a_noop() {
        let mut store = StateStore::new();
        store.apply_delta(GameStateDelta {
            round: Some(2),
            ..Default::default()
        });
        assert!(store.current().is_none());
    }

    #[test]
    fn early_deltas_are_discarded_by_first_snapshot() {
        let mut store = StateStore::new();
        store.apply_delta(GameStateDelta {
            round: Some(9),
            ..Default::default()
        });
        store.apply_snapshot(snapshot());
        // The pre-snapshot delta must not leak into the fresh snapshot.
        assert_eq!(store.current().unwrap().round, 1);
    }

    #[test]
    fn delta_merges_only_present_fields() {
        let mut store = StateStore::new();
        store.apply_snapshot(snapshot());
        store.apply_delta(GameStateDelta {
            round: Some(2),
            current_phase: Some(Phase::Debrief),
            ..Default::default()
        });
        let state = store.current().unwrap();
        assert_eq!(state.round, 2);
        assert_eq!(state.current_phase, Phase::Debrief);
        // Untouched field survives.
        assert_eq!(state.prepared_ingredients.len(), 1);
    }

    #[test]
    fn deltas_apply_field_wise_last_write_wins() {
        let mut store = StateStore::new();
        store.apply_snapshot(snapshot());
        store.apply_delta(GameStateDelta {
            round: Some(2),
            ..Default::default()
        });
        store.apply_delta(GameStateDelta {
            round: Some(3),
            oven_on: Some(true),
            ..Default::default()
        });
        let state = store.current().unwrap();
        assert_eq!(state.round, 3);
        assert!(state.oven_on);
    }

    #[test]
    fn identical_delta_twice_equals_once() {
        let mut store = StateStore::new();
        store.apply_snapshot(snapshot());
        let delta = GameStateDelta {
            customer_orders: Some(vec![Order {
                id: "o1".into(),
                kind: "plain".into(),
                ingredients: Default::default(),
            }]),
            ..Default::default()
        };
        store.apply_delta(delta.clone());
        let once = store.current().unwrap().clone();
        store.apply_delta(delta);
        assert_eq!(store.current().unwrap(), &once);
    }

    #[test]
    fn listeners_fire_in_subscription_order() {
        let mut store = StateStore::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let log = Arc::clone(&log);
            store.subscribe(Box::new(move |_| log.lock().unwrap().push(tag)));
        }
        store.apply_snapshot(snapshot());
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn snapshot_is_one_visible_update() {
        let mut store = StateStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        store.subscribe(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        store.apply_snapshot(snapshot());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ingredient_removed_moves_into_target_builder() {
        let mut store = StateStore::new();
        store.apply_snapshot(snapshot());
        store.ingredient_removed("i1", Some(&"sid-1".to_string()));
        let state = store.current().unwrap();
        assert!(state.prepared_ingredients.is_empty());
        assert_eq!(state.players["sid-1"].builder_ingredients.len(), 1);
    }

    #[test]
    fn ingredient_removed_without_target_just_leaves_pool() {
        let mut store = StateStore::new();
        store.apply_snapshot(snapshot());
        store.ingredient_removed("i1", None);
        let state = store.current().unwrap();
        assert!(state.prepared_ingredients.is_empty());
        assert!(state.players["sid-1"].builder_ingredients.is_empty());
    }

    #[test]
    fn pizza_built_is_idempotent() {
        let mut store = StateStore::new();
        store.apply_snapshot(snapshot());
        store.pizza_built(pizza("p1"));
        store.pizza_built(pizza("p1"));
        assert_eq!(store.current().unwrap().built_pizzas.len(), 1);
    }

    #[test]
    fn pizza_moved_to_oven_leaves_built_pool() {
        let mut store = StateStore::new();
        store.apply_snapshot(snapshot());
        store.pizza_built(pizza("p1"));
        store.pizza_moved_to_oven(pizza("p1"));
        let state = store.current().unwrap();
        assert!(state.built_pizzas.is_empty());
        assert_eq!(state.oven.len(), 1);
    }

    #[test]
    fn round_started_clears_per_round_material() {
        let mut store = StateStore::new();
        store.apply_snapshot(snapshot());
        store.pizza_built(pizza("p1"));
        store.round_started(2, vec![]);
        let state = store.current().unwrap();
        assert_eq!(state.round, 2);
        assert_eq!(state.current_phase, Phase::Round);
        assert!(state.built_pizzas.is_empty());
        assert!(state.prepared_ingredients.is_empty());
        assert!(state.players["sid-1"].builder_ingredients.is_empty());
    }

    #[test]
    fn oven_toggled_off_empties_oven() {
        let mut store = StateStore::new();
        store.apply_snapshot(snapshot());
        store.pizza_built(pizza("p1"));
        store.pizza_moved_to_oven(pizza("p1"));
        store.oven_toggled(OvenSwitch::On);
        assert!(store.current().unwrap().oven_on);
        store.oven_toggled(OvenSwitch::Off);
        let state = store.current().unwrap();
        assert!(!state.oven_on);
        assert!(state.oven.is_empty());
    }

    #[test]
    fn order_lifecycle() {
        let mut store = StateStore::new();
        store.apply_snapshot(snapshot());
        let order = Order {
            id: "o1".into(),
            kind: "plain".into(),
            ingredients: Default::default(),
        };
        store.orders_added(vec![order.clone(), order]);
        assert_eq!(store.current().unwrap().customer_orders.len(), 1);
        store.order_fulfilled("o1");
        assert!(store.current().unwrap().customer_orders.is_empty());
    }

    #[test]
    fn narrow_mutators_are_noops_before_snapshot() {
        let mut store = StateStore::new();
        store.pizza_built(pizza("p1"));
        store.round_started(2, vec![]);
        store.oven_toggled(OvenSwitch::On);
        assert!(store.current().is_none());
    }
}
