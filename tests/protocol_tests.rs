//! Wire-format tests for the pizza kitchen protocol types.
//!
//! These use hand-written JSON shaped like real server traffic, rather than
//! round-tripping through our own serializer, so a drift between the Rust
//! types and the server's event format shows up here first.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod common;

use pizza_kitchen_client::protocol::{
    ClientMessage, GameState, IngredientType, OvenSwitch, Phase, PizzaStatus, ServerMessage,
};

// ── Outbound messages ───────────────────────────────────────────────

#[test]
fn join_serializes_with_type_and_data_envelope() {
    let msg = ClientMessage::Join {
        room: "kitchen-7".into(),
    };
    let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["type"], "join");
    assert_eq!(value["data"]["room"], "kitchen-7");
}

#[test]
fn take_ingredient_omits_absent_target() {
    let msg = ClientMessage::TakeIngredient {
        ingredient_id: "i1".into(),
        target_sid: None,
    };
    let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["type"], "take_ingredient");
    assert_eq!(value["data"]["ingredient_id"], "i1");
    assert!(value["data"].get("target_sid").is_none());
}

#[test]
fn take_ingredient_includes_target_for_shared_builders() {
    let msg = ClientMessage::TakeIngredient {
        ingredient_id: "i1".into(),
        target_sid: Some("sid-2".into()),
    };
    let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["data"]["target_sid"], "sid-2");
}

#[test]
fn build_pizza_round_one_sends_staged_ingredients() {
    let msg = ClientMessage::BuildPizza {
        ingredients: Some(vec![common::ingredient("a", IngredientType::Base)]),
        player_sid: None,
    };
    let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["type"], "build_pizza");
    assert_eq!(value["data"]["ingredients"][0]["id"], "a");
    assert_eq!(value["data"]["ingredients"][0]["type"], "base");
    assert!(value["data"].get("player_sid").is_none());
}

#[test]
fn toggle_oven_serializes_switch_state() {
    let on: serde_json::Value =
        serde_json::to_value(ClientMessage::ToggleOven {
            state: OvenSwitch::On,
        })
        .unwrap();
    assert_eq!(on["type"], "toggle_oven");
    assert_eq!(on["data"]["state"], "on");
}

#[test]
fn time_request_has_no_payload_fields() {
    let json = serde_json::to_string(&ClientMessage::TimeRequest).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["type"], "time_request");
}

// ── Inbound messages ────────────────────────────────────────────────

#[test]
fn game_state_snapshot_parses_from_server_shape() {
    let raw = r#"{
        "type": "game_state",
        "data": {
            "round": 2,
            "max_rounds": 3,
            "current_phase": "round",
            "players": {
                "sid-1": { "builder_ingredients": [ { "id": "i9", "type": "ham" } ] }
            },
            "prepared_ingredients": [ { "id": "i1", "type": "base" } ],
            "built_pizzas": [],
            "oven": [],
            "completed_pizzas": [],
            "wasted_pizzas": [],
            "customer_orders": [],
            "max_pizzas_in_oven": 3,
            "oven_on": true,
            "round_duration": 420
        }
    }"#;
    let msg: ServerMessage = serde_json::from_str(raw).unwrap();
    let ServerMessage::GameState(state) = msg else {
        panic!("expected GameState");
    };
    assert_eq!(state.round, 2);
    assert_eq!(state.current_phase, Phase::Round);
    assert!(state.oven_on);
    assert_eq!(state.players["sid-1"].builder_ingredients[0].id, "i9");
    assert_eq!(
        state.players["sid-1"].builder_ingredients[0].kind,
        IngredientType::Ham
    );
}

#[test]
fn snapshot_missing_optional_collections_defaults_empty() {
    let raw = r#"{
        "type": "game_state",
        "data": { "round": 1, "max_rounds": 3, "current_phase": "waiting" }
    }"#;
    let msg: ServerMessage = serde_json::from_str(raw).unwrap();
    let ServerMessage::GameState(state) = msg else {
        panic!("expected GameState");
    };
    assert!(state.players.is_empty());
    assert!(state.prepared_ingredients.is_empty());
    assert_eq!(state.max_pizzas_in_oven, 3);
    assert_eq!(state.round_duration, 420);
}

#[test]
fn snapshot_missing_round_fails_closed() {
    let raw = r#"{
        "type": "game_state",
        "data": { "max_rounds": 3, "current_phase": "waiting" }
    }"#;
    assert!(serde_json::from_str::<ServerMessage>(raw).is_err());
}

#[test]
fn snapshot_ignores_unknown_fields() {
    let raw = r#"{
        "type": "game_state",
        "data": {
            "round": 1, "max_rounds": 3, "current_phase": "waiting",
            "some_future_field": { "nested": true }
        }
    }"#;
    assert!(serde_json::from_str::<ServerMessage>(raw).is_ok());
}

#[test]
fn delta_parses_only_named_fields() {
    let raw = r#"{
        "type": "game_state_update",
        "data": { "oven_on": true, "round": 2 }
    }"#;
    let msg: ServerMessage = serde_json::from_str(raw).unwrap();
    let ServerMessage::GameStateUpdate(delta) = msg else {
        panic!("expected GameStateUpdate");
    };
    assert_eq!(delta.oven_on, Some(true));
    assert_eq!(delta.round, Some(2));
    assert_eq!(delta.current_phase, None);
    assert_eq!(delta.prepared_ingredients, None);
}

#[test]
fn round_started_defaults_missing_orders() {
    let raw = r#"{
        "type": "round_started",
        "data": { "round": 1, "duration": 420 }
    }"#;
    let msg: ServerMessage = serde_json::from_str(raw).unwrap();
    let ServerMessage::RoundStarted {
        round,
        duration,
        customer_orders,
    } = msg
    else {
        panic!("expected RoundStarted");
    };
    assert_eq!(round, 1);
    assert_eq!(duration, 420);
    assert!(customer_orders.is_empty());
}

#[test]
fn round_ended_round_three_counters_parse() {
    let raw = r#"{
        "type": "round_ended",
        "data": {
            "completed_pizzas_count": 4,
            "wasted_pizzas_count": 1,
            "unsold_pizzas_count": 0,
            "ingredients_left_count": 7,
            "score": 30,
            "fulfilled_orders_count": 3,
            "remaining_orders_count": 2,
            "unmatched_pizzas_count": 1
        }
    }"#;
    let msg: ServerMessage = serde_json::from_str(raw).unwrap();
    let ServerMessage::RoundEnded(result) = msg else {
        panic!("expected RoundEnded");
    };
    assert_eq!(result.completed_pizzas_count, 4);
    assert_eq!(result.score, 30);
    assert_eq!(result.fulfilled_orders_count, Some(3));
}

#[test]
fn round_ended_without_round_three_counters_parses() {
    let raw = r#"{
        "type": "round_ended",
        "data": {
            "completed_pizzas_count": 2,
            "wasted_pizzas_count": 0,
            "unsold_pizzas_count": 1,
            "score": 10
        }
    }"#;
    let msg: ServerMessage = serde_json::from_str(raw).unwrap();
    let ServerMessage::RoundEnded(result) = msg else {
        panic!("expected RoundEnded");
    };
    assert_eq!(result.fulfilled_orders_count, None);
    assert_eq!(result.ingredients_left_count, 0);
}

#[test]
fn pizza_status_and_label_parse() {
    let raw = r#"{
        "type": "pizza_built",
        "data": {
            "pizza_id": "p1",
            "ingredients": { "base": 1, "sauce": 1, "ham": 2 },
            "status": "cooked",
            "type": "ham",
            "emoji": "🍕"
        }
    }"#;
    let msg: ServerMessage = serde_json::from_str(raw).unwrap();
    let ServerMessage::PizzaBuilt(pizza) = msg else {
        panic!("expected PizzaBuilt");
    };
    assert_eq!(pizza.status, Some(PizzaStatus::Cooked));
    assert_eq!(pizza.kind.as_deref(), Some("ham"));
    assert_eq!(pizza.ingredients.ham, 2);
    assert_eq!(pizza.ingredients.pineapple, 0);
}

#[test]
fn time_response_uses_camel_case_payload() {
    let raw = r#"{
        "type": "time_response",
        "data": { "phase": "round", "roundTimeRemaining": 137, "ovenTime": 12 }
    }"#;
    let msg: ServerMessage = serde_json::from_str(raw).unwrap();
    let ServerMessage::TimeResponse(sync) = msg else {
        panic!("expected TimeResponse");
    };
    assert_eq!(sync.phase, Phase::Round);
    assert_eq!(sync.round_time_remaining, 137);
    assert_eq!(sync.oven_time, 12);
}

#[test]
fn room_list_parses_name_to_count_map() {
    let raw = r#"{
        "type": "room_list",
        "data": { "rooms": { "kitchen-7": 3, "lunch-rush": 1 } }
    }"#;
    let msg: ServerMessage = serde_json::from_str(raw).unwrap();
    let ServerMessage::RoomList { rooms } = msg else {
        panic!("expected RoomList");
    };
    assert_eq!(rooms.get("kitchen-7"), Some(&3));
    assert_eq!(rooms.get("lunch-rush"), Some(&1));
}

#[test]
fn unknown_event_type_is_an_error() {
    let raw = r#"{ "type": "telemetry_blob", "data": {} }"#;
    assert!(serde_json::from_str::<ServerMessage>(raw).is_err());
}

#[test]
fn default_game_state_matches_server_initial_shape() {
    let state = GameState::default();
    assert_eq!(state.round, 1);
    assert_eq!(state.max_rounds, 3);
    assert_eq!(state.current_phase, Phase::Waiting);
    assert_eq!(state.max_pizzas_in_oven, 3);
    assert_eq!(state.round_duration, 420);
    assert!(!state.oven_on);
}
