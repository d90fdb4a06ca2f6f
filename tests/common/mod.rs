#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for pizza kitchen client integration tests.
//!
//! Provides a scripted [`MockTransport`], a [`ScriptedConnector`] that hands
//! out one transport per connection attempt, and helper functions for
//! constructing common server event JSON strings.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use pizza_kitchen_client::protocol::{
    GameState, GameStateDelta, Ingredient, IngredientCounts, IngredientType, Order, OvenSwitch,
    Phase, Pizza, RoundResult, ServerMessage, TimeSync,
};
use pizza_kitchen_client::{
    BoxTransport, Connector, KitchenError, KitchenEvent, Transport,
};

/// One scripted connection: the frames `recv()` will yield, in order.
pub type Script = Vec<Option<Result<String, KitchenError>>>;

// ── MockTransport ───────────────────────────────────────────────────

/// A scripted mock transport for integration testing.
///
/// Server responses are consumed in order by `recv()`; once the script runs
/// out, `recv()` hangs so the transport loop stays alive until shutdown.
/// All messages sent by the client are recorded in `sent`.
pub struct MockTransport {
    incoming: VecDeque<Option<Result<String, KitchenError>>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), KitchenError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, KitchenError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            // No more scripted messages — hang forever so the transport loop
            // stays alive until shutdown is called.
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), KitchenError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── ScriptedConnector ───────────────────────────────────────────────

/// Hands out one scripted [`MockTransport`] per connection attempt, in order.
/// Further attempts fail, which keeps the loop in backoff.
pub struct ScriptedConnector {
    scripts: StdMutex<VecDeque<Script>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl ScriptedConnector {
    /// Build a connector from per-connection scripts. Returns shared handles
    /// for inspecting everything the client sent (across all connections)
    /// and whether `close()` was called.
    pub fn new(scripts: Vec<Script>) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let connector = Self {
            scripts: StdMutex::new(VecDeque::from(scripts)),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (connector, sent, closed)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<BoxTransport, KitchenError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| KitchenError::TransportSend("no scripted connection left".into()))?;
        Ok(Box::new(MockTransport {
            incoming: VecDeque::from(script),
            sent: Arc::clone(&self.sent),
            closed: Arc::clone(&self.closed),
        }))
    }
}

// ── Event helpers ───────────────────────────────────────────────────

/// Receive the next event, failing the test after two seconds.
pub async fn next_event(rx: &mut tokio::sync::mpsc::Receiver<KitchenEvent>) -> KitchenEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Consume events until one matches `pred`, returning it. Fails the test if
/// ten events pass without a match.
pub async fn wait_for_event(
    rx: &mut tokio::sync::mpsc::Receiver<KitchenEvent>,
    pred: impl Fn(&KitchenEvent) -> bool,
) -> KitchenEvent {
    for _ in 0..10 {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
    panic!("expected event did not arrive within 10 events");
}

/// Decode the `type` tag of every message the client sent.
pub fn sent_types(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<String> {
    sent.lock()
        .unwrap()
        .iter()
        .map(|raw| {
            serde_json::from_str::<serde_json::Value>(raw).unwrap()["type"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect()
}

// ── Fixtures ────────────────────────────────────────────────────────

/// A concrete ingredient with the given id and type.
pub fn ingredient(id: &str, kind: IngredientType) -> Ingredient {
    Ingredient {
        id: id.into(),
        kind,
    }
}

/// A plain cheese pizza recipe (1 base, 1 sauce).
pub fn plain_counts() -> IngredientCounts {
    IngredientCounts {
        base: 1,
        sauce: 1,
        ham: 0,
        pineapple: 0,
    }
}

/// A built pizza with the given id and recipe counts.
pub fn pizza(id: &str, counts: IngredientCounts) -> Pizza {
    Pizza {
        pizza_id: id.into(),
        ingredients: counts,
        status: None,
        kind: Some("plain".into()),
        order_id: None,
        emoji: None,
    }
}

/// A round-3 customer order.
pub fn order(id: &str, kind: &str, counts: IngredientCounts) -> Order {
    Order {
        id: id.into(),
        kind: kind.into(),
        ingredients: counts,
    }
}

// ── JSON helper functions ───────────────────────────────────────────

/// Returns the JSON string for a full `game_state` snapshot with defaults.
pub fn snapshot_json() -> String {
    snapshot_json_with(GameState::default())
}

/// Returns the JSON string for a full `game_state` snapshot.
pub fn snapshot_json_with(state: GameState) -> String {
    serde_json::to_string(&ServerMessage::GameState(Box::new(state)))
        .expect("snapshot serialization")
}

/// Returns the JSON string for a `game_state_update` delta.
pub fn delta_json(delta: GameStateDelta) -> String {
    serde_json::to_string(&ServerMessage::GameStateUpdate(delta)).expect("delta serialization")
}

/// Returns the JSON string for a `round_started` event.
pub fn round_started_json(round: u32, orders: Vec<Order>) -> String {
    serde_json::to_string(&ServerMessage::RoundStarted {
        round,
        duration: 420,
        customer_orders: orders,
    })
    .expect("round_started serialization")
}

/// Returns the JSON string for a `round_ended` event.
pub fn round_ended_json(completed: u32, wasted: u32, score: i64) -> String {
    serde_json::to_string(&ServerMessage::RoundEnded(RoundResult {
        completed_pizzas_count: completed,
        wasted_pizzas_count: wasted,
        unsold_pizzas_count: 0,
        ingredients_left_count: 0,
        score,
        fulfilled_orders_count: None,
        remaining_orders_count: None,
        unmatched_pizzas_count: None,
    }))
    .expect("round_ended serialization")
}

/// Returns the JSON string for an `ingredient_prepared` event.
pub fn ingredient_prepared_json(id: &str, kind: IngredientType) -> String {
    serde_json::to_string(&ServerMessage::IngredientPrepared(ingredient(id, kind)))
        .expect("ingredient_prepared serialization")
}

/// Returns the JSON string for an `ingredient_removed` event.
pub fn ingredient_removed_json(id: &str, target_sid: Option<&str>) -> String {
    serde_json::to_string(&ServerMessage::IngredientRemoved {
        ingredient_id: id.into(),
        target_sid: target_sid.map(Into::into),
    })
    .expect("ingredient_removed serialization")
}

/// Returns the JSON string for a `pizza_built` event.
pub fn pizza_built_json(id: &str, counts: IngredientCounts) -> String {
    serde_json::to_string(&ServerMessage::PizzaBuilt(pizza(id, counts)))
        .expect("pizza_built serialization")
}

/// Returns the JSON string for a `pizza_moved_to_oven` event.
pub fn pizza_moved_json(id: &str, counts: IngredientCounts) -> String {
    serde_json::to_string(&ServerMessage::PizzaMovedToOven(pizza(id, counts)))
        .expect("pizza_moved serialization")
}

/// Returns the JSON string for an `oven_toggled` event.
pub fn oven_toggled_json(state: OvenSwitch) -> String {
    serde_json::to_string(&ServerMessage::OvenToggled { state })
        .expect("oven_toggled serialization")
}

/// Returns the JSON string for a `join_error` event.
pub fn join_error_json(message: &str) -> String {
    serde_json::to_string(&ServerMessage::JoinError {
        message: message.into(),
    })
    .expect("join_error serialization")
}

/// Returns the JSON string for a `room_expired` event.
pub fn room_expired_json(message: &str) -> String {
    serde_json::to_string(&ServerMessage::RoomExpired {
        message: message.into(),
    })
    .expect("room_expired serialization")
}

/// Returns the JSON string for an `oven_error` event.
pub fn oven_error_json(message: &str) -> String {
    serde_json::to_string(&ServerMessage::OvenError {
        message: message.into(),
    })
    .expect("oven_error serialization")
}

/// Returns the JSON string for a `build_error` event.
pub fn build_error_json(message: &str) -> String {
    serde_json::to_string(&ServerMessage::BuildError {
        message: message.into(),
    })
    .expect("build_error serialization")
}

/// Returns the JSON string for a `time_response` event.
pub fn time_response_json(phase: Phase, remaining: u64, oven_time: u64) -> String {
    serde_json::to_string(&ServerMessage::TimeResponse(TimeSync {
        phase,
        round_time_remaining: remaining,
        oven_time,
    }))
    .expect("time_response serialization")
}
