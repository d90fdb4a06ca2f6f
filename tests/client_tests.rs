//! Integration-style client tests for the pizza kitchen client.
//!
//! Uses the scripted mocks from `tests/common` for one-way flows and a
//! channel-fed transport (defined below) when a test needs to interleave
//! client actions with server events.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod common;

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use pizza_kitchen_client::protocol::{
    ClientMessage, GameState, GameStateDelta, IngredientType, OvenSwitch, Phase,
};
use pizza_kitchen_client::{
    BoxTransport, Connector, KitchenClient, KitchenConfig, KitchenError, KitchenEvent,
    MemoryRoomStore, Transport, ViewMode,
};

use common::{
    ingredient, ingredient_prepared_json, ingredient_removed_json, join_error_json, next_event,
    oven_error_json, pizza, plain_counts, room_expired_json, round_ended_json, round_started_json,
    sent_types, snapshot_json, snapshot_json_with, time_response_json, wait_for_event,
    ScriptedConnector,
};

// ════════════════════════════════════════════════════════════════════
// Channel-fed transport for interleaved scenarios
// ════════════════════════════════════════════════════════════════════

/// A transport fed frame-by-frame from the test body. Dropping the feeder
/// closes the connection (recv yields `None`).
struct ChannelTransport {
    rx: tokio::sync::mpsc::UnboundedReceiver<Result<String, KitchenError>>,
    sent: Arc<StdMutex<Vec<String>>>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, message: String) -> Result<(), KitchenError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, KitchenError>> {
        self.rx.recv().await
    }

    async fn close(&mut self) -> Result<(), KitchenError> {
        Ok(())
    }
}

type Feeder = tokio::sync::mpsc::UnboundedSender<Result<String, KitchenError>>;

/// Hands out pre-built channel transports, one per connection attempt.
struct ChannelConnector {
    slots: StdMutex<VecDeque<ChannelTransport>>,
}

impl ChannelConnector {
    /// Build `connections` channel transports sharing one `sent` log.
    fn new(connections: usize) -> (Self, Vec<Feeder>, Arc<StdMutex<Vec<String>>>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let mut feeders = Vec::new();
        let mut slots = VecDeque::new();
        for _ in 0..connections {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            feeders.push(tx);
            slots.push_back(ChannelTransport {
                rx,
                sent: Arc::clone(&sent),
            });
        }
        (
            Self {
                slots: StdMutex::new(slots),
            },
            feeders,
            sent,
        )
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self) -> Result<BoxTransport, KitchenError> {
        let transport = self
            .slots
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| KitchenError::TransportSend("no connection slot left".into()))?;
        Ok(Box::new(transport))
    }
}

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn test_config() -> KitchenConfig {
    KitchenConfig::new()
        .with_reconnect_initial_delay(Duration::from_millis(10))
        .with_time_sync_interval(Duration::from_secs(3600))
        .with_room_store(Arc::new(MemoryRoomStore::with_room("kitchen-7")))
}

async fn drain_until_state_changed(rx: &mut tokio::sync::mpsc::Receiver<KitchenEvent>) {
    let _ = wait_for_event(rx, |e| matches!(e, KitchenEvent::StateChanged)).await;
}

// ════════════════════════════════════════════════════════════════════
// Connect / join lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn persisted_room_rejoin_yields_snapshot() {
    let (connector, sent, _closed) = ScriptedConnector::new(vec![vec![Some(Ok(snapshot_json()))]]);
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    let ev = next_event(&mut events).await;
    assert!(matches!(ev, KitchenEvent::Connected), "got {ev:?}");
    drain_until_state_changed(&mut events).await;

    let state = client.state().await.expect("snapshot applied");
    assert_eq!(state.round, 1);
    assert_eq!(state.current_phase, Phase::Waiting);

    // The very first outbound message is the rejoin for the persisted room.
    let first: ClientMessage = serde_json::from_str(&sent.lock().unwrap()[0]).unwrap();
    assert_eq!(
        first,
        ClientMessage::Join {
            room: "kitchen-7".into()
        }
    );

    client.shutdown().await;
}

#[tokio::test]
async fn join_error_surfaces_without_clearing_persisted_room() {
    let (connector, _sent, _closed) =
        ScriptedConnector::new(vec![vec![Some(Ok(join_error_json("room is full")))]]);
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    let ev = wait_for_event(&mut events, |e| {
        matches!(e, KitchenEvent::JoinRejected { .. })
    })
    .await;
    let KitchenEvent::JoinRejected { message } = ev else {
        panic!("expected JoinRejected");
    };
    assert_eq!(message, "room is full");

    // Inline feedback only — the persisted room must survive.
    assert_eq!(client.persisted_room().as_deref(), Some("kitchen-7"));

    client.shutdown().await;
}

#[tokio::test]
async fn room_expired_clears_room_and_reopens_picker() {
    let (connector, sent, _closed) = ScriptedConnector::new(vec![vec![
        Some(Ok(snapshot_json())),
        Some(Ok(room_expired_json("room timed out"))),
    ]]);
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    let _ = wait_for_event(&mut events, |e| matches!(e, KitchenEvent::RoomExpired { .. })).await;
    let _ = wait_for_event(&mut events, |e| {
        matches!(e, KitchenEvent::NeedRoomSelection)
    })
    .await;

    assert_eq!(client.persisted_room(), None);
    assert_eq!(client.state().await, None);

    // The client immediately asks for the directory so the picker has data.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sent_types(&sent).contains(&"request_room_list".to_string()));

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Snapshot / delta ordering
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn delta_before_snapshot_is_discarded() {
    let early = GameStateDelta {
        oven_on: Some(true),
        ..GameStateDelta::default()
    };
    let (connector, _sent, _closed) = ScriptedConnector::new(vec![vec![
        Some(Ok(common::delta_json(early))),
        Some(Ok(snapshot_json())),
    ]]);
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    drain_until_state_changed(&mut events).await;
    // Give the loop time to process both frames.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The pre-snapshot delta never leaks into the state.
    let state = client.state().await.expect("snapshot applied");
    assert!(!state.oven_on);

    client.shutdown().await;
}

#[tokio::test]
async fn delta_after_snapshot_merges_named_fields_only() {
    let delta = GameStateDelta {
        round: Some(2),
        oven_on: Some(true),
        ..GameStateDelta::default()
    };
    let mut snapshot = GameState::default();
    snapshot
        .prepared_ingredients
        .push(ingredient("i1", IngredientType::Base));
    let (connector, _sent, _closed) = ScriptedConnector::new(vec![vec![
        Some(Ok(snapshot_json_with(snapshot))),
        Some(Ok(common::delta_json(delta))),
    ]]);
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    drain_until_state_changed(&mut events).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = client.state().await.expect("state");
    assert_eq!(state.round, 2);
    assert!(state.oven_on);
    // Untouched field survives the merge.
    assert_eq!(state.prepared_ingredients.len(), 1);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Optimistic reconciliation
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn optimistic_take_overlays_then_reconciles() {
    let (connector, feeders, _sent) = ChannelConnector::new(1);
    let feeder = feeders[0].clone();
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    let mut snapshot = GameState::default();
    snapshot.current_phase = Phase::Round;
    snapshot
        .prepared_ingredients
        .push(ingredient("i1", IngredientType::Base));
    feeder.send(Ok(snapshot_json_with(snapshot))).unwrap();
    drain_until_state_changed(&mut events).await;

    // Optimistic take: the pool empties in the local view immediately, but
    // the authoritative state is untouched.
    client
        .take_ingredient(ingredient("i1", IngredientType::Base), None)
        .await
        .unwrap();
    assert_eq!(client.pending_actions().await, 1);
    let view = client.local_view().await.unwrap();
    assert!(view.prepared_ingredients.is_empty());
    assert_eq!(client.state().await.unwrap().prepared_ingredients.len(), 1);
    assert_eq!(client.local_builder().await.len(), 1);

    // Confirmation retires the pending entry and updates the real state.
    feeder.send(Ok(ingredient_removed_json("i1", None))).unwrap();
    drain_until_state_changed(&mut events).await;
    assert_eq!(client.pending_actions().await, 0);
    assert!(client
        .state()
        .await
        .unwrap()
        .prepared_ingredients
        .is_empty());

    client.shutdown().await;
}

#[tokio::test]
async fn oven_rejection_rolls_back_the_move() {
    let (connector, feeders, _sent) = ChannelConnector::new(1);
    let feeder = feeders[0].clone();
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    let mut snapshot = GameState::default();
    snapshot.current_phase = Phase::Round;
    snapshot.built_pizzas.push(pizza("p1", plain_counts()));
    feeder.send(Ok(snapshot_json_with(snapshot))).unwrap();
    drain_until_state_changed(&mut events).await;

    client.move_to_oven("p1").await.unwrap();
    let view = client.local_view().await.unwrap();
    assert!(view.built_pizzas.is_empty());
    assert_eq!(view.oven.len(), 1);

    // Server refuses (oven at WIP limit): the overlay reverts wholesale.
    feeder.send(Ok(oven_error_json("oven is full"))).unwrap();
    let ev = wait_for_event(&mut events, |e| {
        matches!(e, KitchenEvent::ActionRejected { .. })
    })
    .await;
    let KitchenEvent::ActionRejected { message } = ev else {
        panic!("expected ActionRejected");
    };
    assert_eq!(message, "oven is full");

    assert_eq!(client.pending_actions().await, 0);
    let view = client.local_view().await.unwrap();
    assert_eq!(view.built_pizzas.len(), 1);
    assert!(view.oven.is_empty());

    client.shutdown().await;
}

#[tokio::test]
async fn fresh_snapshot_drops_unconfirmed_actions() {
    let (connector, feeders, _sent) = ChannelConnector::new(1);
    let feeder = feeders[0].clone();
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    let mut snapshot = GameState::default();
    snapshot.current_phase = Phase::Round;
    snapshot
        .prepared_ingredients
        .push(ingredient("i1", IngredientType::Sauce));
    feeder.send(Ok(snapshot_json_with(snapshot.clone()))).unwrap();
    drain_until_state_changed(&mut events).await;

    client
        .take_ingredient(ingredient("i1", IngredientType::Sauce), None)
        .await
        .unwrap();
    assert_eq!(client.pending_actions().await, 1);

    // Authoritative truth arrives; the stale pending entry is gone and the
    // pool renders whatever the server says.
    feeder.send(Ok(snapshot_json_with(snapshot))).unwrap();
    drain_until_state_changed(&mut events).await;
    assert_eq!(client.pending_actions().await, 0);
    assert_eq!(
        client.local_view().await.unwrap().prepared_ingredients.len(),
        1
    );

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Reconnect
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn reconnect_rejoins_and_clears_pending_actions() {
    let (connector, mut feeders, sent) = ChannelConnector::new(2);
    let feeder1 = feeders.remove(0);
    let feeder2 = feeders.remove(0);
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    let mut snapshot = GameState::default();
    snapshot
        .prepared_ingredients
        .push(ingredient("i1", IngredientType::Ham));
    feeder1.send(Ok(snapshot_json_with(snapshot.clone()))).unwrap();
    drain_until_state_changed(&mut events).await;

    client
        .take_ingredient(ingredient("i1", IngredientType::Ham), None)
        .await
        .unwrap();
    assert_eq!(client.pending_actions().await, 1);

    // Kill the first connection. The loop reports the drop, backs off, and
    // dials the second transport.
    drop(feeder1);
    let _ = wait_for_event(&mut events, |e| {
        matches!(e, KitchenEvent::Disconnected { .. })
    })
    .await;
    let _ = wait_for_event(&mut events, |e| {
        matches!(e, KitchenEvent::Reconnecting { attempt: 1 })
    })
    .await;
    let _ = wait_for_event(&mut events, |e| matches!(e, KitchenEvent::Connected)).await;

    // Reconnection cancels trust in unconfirmed actions.
    assert_eq!(client.pending_actions().await, 0);

    feeder2.send(Ok(snapshot_json_with(snapshot))).unwrap();
    drain_until_state_changed(&mut events).await;
    assert!(client.is_connected());

    // Both connections opened with a rejoin of the persisted room.
    let joins = sent_types(&sent).iter().filter(|t| *t == "join").count();
    assert_eq!(joins, 2);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Round lifecycle and view selection
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn round_lifecycle_emits_round_and_view_events() {
    let mut snapshot = GameState::default();
    snapshot.round = 1;
    snapshot.current_phase = Phase::Round;
    let (connector, _sent, _closed) = ScriptedConnector::new(vec![vec![
        Some(Ok(snapshot_json_with(snapshot))),
        Some(Ok(round_ended_json(3, 1, 20))),
        Some(Ok(round_started_json(2, vec![]))),
    ]]);
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    // Round 1, round phase: solo builder.
    let ev = wait_for_event(&mut events, |e| matches!(e, KitchenEvent::ViewChanged(_))).await;
    assert_eq!(ev, KitchenEvent::ViewChanged(ViewMode::SoloBuilder));

    // Round 1 debrief: shared layout, with reflection content attached.
    let ev = wait_for_event(&mut events, |e| matches!(e, KitchenEvent::RoundEnded { .. })).await;
    let KitchenEvent::RoundEnded { result, debrief } = ev else {
        panic!("expected RoundEnded");
    };
    assert_eq!(result.completed_pizzas_count, 3);
    assert_eq!(result.score, 20);
    assert!(debrief.is_some(), "mid-game debrief has content");
    let ev = wait_for_event(&mut events, |e| matches!(e, KitchenEvent::ViewChanged(_))).await;
    assert_eq!(ev, KitchenEvent::ViewChanged(ViewMode::SharedBuilders));

    // Round 2 begins: stays shared, no duplicate ViewChanged needed.
    let ev = wait_for_event(&mut events, |e| matches!(e, KitchenEvent::RoundStarted { .. })).await;
    assert_eq!(
        ev,
        KitchenEvent::RoundStarted {
            round: 2,
            duration: 420
        }
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    let state = client.state().await.unwrap();
    assert_eq!(state.round, 2);
    assert_eq!(state.current_phase, Phase::Round);

    client.shutdown().await;
}

#[tokio::test]
async fn round_started_clears_leftover_round_material() {
    let mut snapshot = GameState::default();
    snapshot.current_phase = Phase::Debrief;
    snapshot
        .prepared_ingredients
        .push(ingredient("i1", IngredientType::Base));
    snapshot.built_pizzas.push(pizza("p1", plain_counts()));
    snapshot.oven_on = true;
    let (connector, _sent, _closed) = ScriptedConnector::new(vec![vec![
        Some(Ok(snapshot_json_with(snapshot))),
        Some(Ok(round_started_json(2, vec![]))),
    ]]);
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    let _ = wait_for_event(&mut events, |e| matches!(e, KitchenEvent::RoundStarted { .. })).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = client.state().await.unwrap();
    assert!(state.prepared_ingredients.is_empty());
    assert!(state.built_pizzas.is_empty());
    assert!(!state.oven_on);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Incremental events
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn incremental_events_mutate_state() {
    let (connector, _sent, _closed) = ScriptedConnector::new(vec![vec![
        Some(Ok(snapshot_json())),
        Some(Ok(ingredient_prepared_json("i1", IngredientType::Pineapple))),
        Some(Ok(common::oven_toggled_json(OvenSwitch::On))),
    ]]);
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    drain_until_state_changed(&mut events).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = client.state().await.unwrap();
    assert_eq!(state.prepared_ingredients.len(), 1);
    assert_eq!(state.prepared_ingredients[0].kind, IngredientType::Pineapple);
    assert!(state.oven_on);

    client.shutdown().await;
}

#[tokio::test]
async fn time_response_is_surfaced_as_event() {
    let (connector, _sent, _closed) = ScriptedConnector::new(vec![vec![
        Some(Ok(snapshot_json())),
        Some(Ok(time_response_json(Phase::Round, 321, 9))),
    ]]);
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    let ev = wait_for_event(&mut events, |e| matches!(e, KitchenEvent::TimeSync(_))).await;
    let KitchenEvent::TimeSync(sync) = ev else {
        panic!("expected TimeSync");
    };
    assert_eq!(sync.round_time_remaining, 321);
    assert_eq!(sync.oven_time, 9);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Outbound actions
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn build_pizza_sends_staged_ingredients() {
    let (connector, feeders, sent) = ChannelConnector::new(1);
    let feeder = feeders[0].clone();
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    let mut snapshot = GameState::default();
    snapshot.current_phase = Phase::Round;
    snapshot
        .prepared_ingredients
        .push(ingredient("i1", IngredientType::Base));
    snapshot
        .prepared_ingredients
        .push(ingredient("i2", IngredientType::Sauce));
    feeder.send(Ok(snapshot_json_with(snapshot))).unwrap();
    drain_until_state_changed(&mut events).await;

    client
        .take_ingredient(ingredient("i1", IngredientType::Base), None)
        .await
        .unwrap();
    client
        .take_ingredient(ingredient("i2", IngredientType::Sauce), None)
        .await
        .unwrap();
    client.build_pizza().await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let messages = sent.lock().unwrap().clone();
    let build = messages
        .iter()
        .map(|raw| serde_json::from_str::<serde_json::Value>(raw).unwrap())
        .find(|v| v["type"] == "build_pizza")
        .expect("build_pizza was sent");
    let staged = build["data"]["ingredients"].as_array().unwrap();
    assert_eq!(staged.len(), 2);
    assert_eq!(staged[0]["id"], "i1");
    assert_eq!(staged[1]["id"], "i2");

    client.shutdown().await;
}

#[tokio::test]
async fn shared_build_names_the_target_builder() {
    let (connector, feeders, sent) = ChannelConnector::new(1);
    let feeder = feeders[0].clone();
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    feeder.send(Ok(snapshot_json())).unwrap();
    drain_until_state_changed(&mut events).await;

    client.build_shared_pizza("sid-2".into()).unwrap();
    // Shared builders are server-owned, so nothing goes optimistically
    // pending.
    assert_eq!(client.pending_actions().await, 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let messages = sent.lock().unwrap().clone();
    let build = messages
        .iter()
        .map(|raw| serde_json::from_str::<serde_json::Value>(raw).unwrap())
        .find(|v| v["type"] == "build_pizza")
        .expect("build_pizza was sent");
    assert_eq!(build["data"]["player_sid"], "sid-2");
    assert!(build["data"].get("ingredients").is_none());

    client.shutdown().await;
}

#[tokio::test]
async fn leave_room_clears_everything_locally() {
    let (connector, _sent, _closed) = ScriptedConnector::new(vec![vec![Some(Ok(snapshot_json()))]]);
    let (mut client, mut events) = KitchenClient::start(connector, test_config());

    drain_until_state_changed(&mut events).await;
    assert!(client.state().await.is_some());

    client.leave_room().await.unwrap();
    assert_eq!(client.persisted_room(), None);
    assert_eq!(client.state().await, None);
    assert_eq!(client.pending_actions().await, 0);

    client.shutdown().await;
}
