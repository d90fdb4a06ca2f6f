//! Wire-compatible protocol types for the pizza kitchen game server.
//!
//! Every type in this module produces the same JSON the game server consumes
//! and emits: an externally tagged `{"type": ..., "data": ...}` envelope whose
//! tag is the snake_case event name (`join`, `game_state`, `round_started`, …)
//! and whose payload field names match the server's snake_case keys
//! (`builder_ingredients`, `pizza_id`, `current_phase`).
//!
//! This is a pure translation boundary: no retries, no buffering, no business
//! logic. Malformed inbound payloads fail deserialization as a whole and are
//! dropped (and logged) by the transport loop — an event is never partially
//! applied.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ── Type aliases ────────────────────────────────────────────────────

/// Server-issued session identifier for a player.
pub type PlayerId = String;

// ── Enums ───────────────────────────────────────────────────────────

/// Coarse round lifecycle stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Between games: no round running, start button available.
    #[default]
    Waiting,
    /// An active round is in progress.
    Round,
    /// Round finished; reflection screen with the round result.
    Debrief,
}

/// The closed set of ingredient types the kitchen works with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IngredientType {
    Base,
    Sauce,
    Ham,
    Pineapple,
}

/// Desired oven switch position for `toggle_oven`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OvenSwitch {
    On,
    Off,
}

/// Lifecycle status of a pizza, assigned by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PizzaStatus {
    /// Rejected at build time: ingredient combo matches no recipe.
    Invalid,
    /// Built in round 3 without a matching customer order.
    Unmatched,
    /// Pulled from the oven too early.
    Undercooked,
    /// Baked within the acceptable window.
    Cooked,
    /// Left in the oven too long.
    Burnt,
}

// ── Structs ─────────────────────────────────────────────────────────

/// A single prepared ingredient in the shared pool or a builder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ingredient {
    /// Short server-issued unique id.
    pub id: String,
    /// Ingredient type.
    #[serde(rename = "type")]
    pub kind: IngredientType,
}

/// Per-type ingredient counts, used for pizza recipes and customer orders.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct IngredientCounts {
    #[serde(default)]
    pub base: u32,
    #[serde(default)]
    pub sauce: u32,
    #[serde(default)]
    pub ham: u32,
    #[serde(default)]
    pub pineapple: u32,
}

/// One player's builder: the ingredients they have staged toward a pizza.
///
/// Mutated only via confirmed take/submit events from the server — the local
/// optimistic layer never writes into another player's builder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PlayerBuilder {
    #[serde(default)]
    pub builder_ingredients: Vec<Ingredient>,
}

/// A pizza anywhere in the built → oven → completed/wasted pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pizza {
    pub pizza_id: String,
    /// Recipe the pizza was built from.
    #[serde(default)]
    pub ingredients: IngredientCounts,
    /// Server-assigned status; absent while the pizza is simply "built".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PizzaStatus>,
    /// Recipe/order name ("bacon", "light ham", …). Free-form server label.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Customer order fulfilled by this pizza (round 3 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Display hint supplied by the server; passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

/// A pending customer order (round 3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    /// Order name ("ham", "light pineapple", "plain", …).
    #[serde(rename = "type")]
    pub kind: String,
    pub ingredients: IngredientCounts,
}

/// The authoritative game-state snapshot for a room.
///
/// Wholly replaced on a `game_state` / `game_reset` event; partially merged
/// on `game_state_update` deltas via [`GameStateDelta`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameState {
    pub round: u32,
    pub max_rounds: u32,
    pub current_phase: Phase,
    #[serde(default)]
    pub players: BTreeMap<PlayerId, PlayerBuilder>,
    #[serde(default)]
    pub prepared_ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub built_pizzas: Vec<Pizza>,
    /// Bounded work-in-progress: at most [`GameState::max_pizzas_in_oven`]
    /// pizzas bake at once. The server rejects violating adds; the client
    /// never clamps silently.
    #[serde(default)]
    pub oven: Vec<Pizza>,
    #[serde(default)]
    pub completed_pizzas: Vec<Pizza>,
    #[serde(default)]
    pub wasted_pizzas: Vec<Pizza>,
    #[serde(default)]
    pub customer_orders: Vec<Order>,
    #[serde(default = "default_oven_capacity")]
    pub max_pizzas_in_oven: usize,
    #[serde(default)]
    pub oven_on: bool,
    #[serde(default = "default_round_duration")]
    pub round_duration: u64,
}

fn default_oven_capacity() -> usize {
    3
}

fn default_round_duration() -> u64 {
    420
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            round: 1,
            max_rounds: 3,
            current_phase: Phase::Waiting,
            players: BTreeMap::new(),
            prepared_ingredients: Vec::new(),
            built_pizzas: Vec::new(),
            oven: Vec::new(),
            completed_pizzas: Vec::new(),
            wasted_pizzas: Vec::new(),
            customer_orders: Vec::new(),
            max_pizzas_in_oven: default_oven_capacity(),
            oven_on: false,
            round_duration: default_round_duration(),
        }
    }
}

/// A partial, field-scoped update merged onto an existing [`GameState`].
///
/// Only fields present in the delta are replaced; everything else is left
/// untouched. Unknown fields in the inbound JSON are ignored, not errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GameStateDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<BTreeMap<PlayerId, PlayerBuilder>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepared_ingredients: Option<Vec<Ingredient>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_pizzas: Option<Vec<Pizza>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oven: Option<Vec<Pizza>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_pizzas: Option<Vec<Pizza>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wasted_pizzas: Option<Vec<Pizza>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_orders: Option<Vec<Order>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oven_on: Option<bool>,
}

/// Aggregated counters published at the end of a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RoundResult {
    pub completed_pizzas_count: u32,
    pub wasted_pizzas_count: u32,
    pub unsold_pizzas_count: u32,
    #[serde(default)]
    pub ingredients_left_count: u32,
    pub score: i64,
    /// Round-3 only: orders matched by a completed pizza.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfilled_orders_count: Option<u32>,
    /// Round-3 only: orders still open when time ran out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_orders_count: Option<u32>,
    /// Round-3 only: completed pizzas no order asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unmatched_pizzas_count: Option<u32>,
}

/// Elapsed-time poll response (`time_response`), sent once per second.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeSync {
    pub phase: Phase,
    /// Seconds left in the current round or debrief.
    pub round_time_remaining: u64,
    /// Seconds the oven has been on in the current bake.
    pub oven_time: u64,
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join (or rejoin) a room. The server replies with a full `game_state`
    /// snapshot, so a join doubles as the post-reconnect resync request.
    Join { room: String },
    /// Ask for the room directory (name → player count).
    RequestRoomList,
    /// Start the next round (only honored while the room is waiting).
    StartRound,
    /// Take a prepared ingredient from the shared pool. `target_sid` routes it
    /// into another player's shared builder in rounds 2+.
    TakeIngredient {
        ingredient_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_sid: Option<PlayerId>,
    },
    /// Prepare a new ingredient of the given type into the shared pool.
    PrepareIngredient { ingredient_type: IngredientType },
    /// Submit a pizza. Round 1 sends the locally staged ingredients; rounds
    /// 2+ name the shared builder (`player_sid`) to submit instead.
    BuildPizza {
        #[serde(skip_serializing_if = "Option::is_none")]
        ingredients: Option<Vec<Ingredient>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        player_sid: Option<PlayerId>,
    },
    /// Move a built pizza into the oven (rejected when the WIP limit is hit).
    MoveToOven { pizza_id: String },
    /// Turn the oven on or off. Turning it off resolves every baking pizza.
    ToggleOven { state: OvenSwitch },
    /// Elapsed-time poll, emitted once per second while connected.
    TimeRequest,
}

/// Message types sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Room directory listing: room name → current player count.
    RoomList { rooms: BTreeMap<String, u32> },
    /// The join was refused (room full, room gone, bad name).
    JoinError { message: String },
    /// Full authoritative snapshot. Replaces all game state atomically.
    GameState(Box<GameState>),
    /// Partial update: only the named top-level fields are replaced.
    GameStateUpdate(GameStateDelta),
    /// A new round began. Clears debrief UI and any stale optimistic state.
    RoundStarted {
        round: u32,
        duration: u64,
        #[serde(default)]
        customer_orders: Vec<Order>,
    },
    /// The round ended; debrief begins with the aggregated result.
    RoundEnded(RoundResult),
    /// The game was reset to waiting. Carries a fresh full snapshot.
    GameReset(Box<GameState>),
    /// An ingredient landed in the shared pool.
    IngredientPrepared(Ingredient),
    /// An ingredient left the shared pool — the confirmation for
    /// `take_ingredient`.
    IngredientRemoved {
        ingredient_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_sid: Option<PlayerId>,
    },
    /// A pizza was built — the confirmation for `build_pizza`.
    PizzaBuilt(Pizza),
    /// A pizza entered the oven — the confirmation for `move_to_oven`.
    PizzaMovedToOven(Pizza),
    /// A single new customer order arrived (round 3).
    NewOrder(Order),
    /// A batch of customer orders arrived at once (round 3).
    NewOrders(Vec<Order>),
    /// A customer order was matched by a built pizza.
    OrderFulfilled { order_id: String },
    /// The oven was switched on or off.
    OvenToggled { state: OvenSwitch },
    /// A shared builder was emptied after its pizza was submitted.
    ClearSharedBuilder { player_sid: PlayerId },
    /// The server refused a `build_pizza` action.
    BuildError { message: String },
    /// The server refused a `move_to_oven` or oven toggle action.
    OvenError { message: String },
    /// Generic action error (invalid ingredient type, ingredient taken, …).
    Error { message: String },
    /// The room no longer exists; the client must pick a new one.
    RoomExpired { message: String },
    /// Elapsed-time poll response.
    TimeResponse(TimeSync),
}

impl IngredientCounts {
    /// Tally a list of concrete ingredients into per-type counts.
    pub fn tally(ingredients: &[Ingredient]) -> Self {
        let mut counts = Self::default();
        for ing in ingredients {
            match ing.kind {
                IngredientType::Base => counts.base += 1,
                IngredientType::Sauce => counts.sauce += 1,
                IngredientType::Ham => counts.ham += 1,
                IngredientType::Pineapple => counts.pineapple += 1,
            }
        }
        counts
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

    #[test]
    fn client_message_uses_snake_case_event_names() {
        let json = serde_json::to_value(&ClientMessage::Join {
            room: "kitchen-7".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "join");
        assert_eq!(json["data"]["room"], "kitchen-7");

        let json = serde_json::to_value(&ClientMessage::TimeRequest).unwrap();
        assert_eq!(json["type"], "time_request");
    }

    #[test]
    fn take_ingredient_omits_absent_target() {
        let json = serde_json::to_value(&ClientMessage::TakeIngredient {
            ingredient_id: "abc12345".into(),
            target_sid: None,
        })
        .unwrap();
        assert!(json["data"].get("target_sid").is_none());
    }

    #[test]
    fn game_state_snapshot_parses_server_shape() {
        let raw = serde_json::json!({
            "type": "game_state",
            "data": {
                "round": 2,
                "max_rounds": 3,
                "current_phase": "round",
                "players": { "sid-1": { "builder_ingredients": [
                    { "id": "i1", "type": "ham" }
                ]}},
                "prepared_ingredients": [{ "id": "i2", "type": "base" }],
                "built_pizzas": [],
                "oven": [],
                "completed_pizzas": [],
                "wasted_pizzas": [],
                "customer_orders": [],
                "max_pizzas_in_oven": 3,
                "oven_on": false,
                "round_duration": 420
            }
        });
        let msg: ServerMessage = serde_json::from_value(raw).unwrap();
        let ServerMessage::GameState(state) = msg else {
            panic!("expected GameState");
        };
        assert_eq!(state.round, 2);
        assert_eq!(state.current_phase, Phase::Round);
        assert_eq!(state.players["sid-1"].builder_ingredients.len(), 1);
        assert_eq!(state.prepared_ingredients[0].kind, IngredientType::Base);
    }

    #[test]
    fn delta_ignores_unknown_fields() {
        let raw = serde_json::json!({
            "type": "game_state_update",
            "data": {
                "customer_orders": [],
                "pending_orders": [{ "id": "x", "arrival_time": 3.0 }]
            }
        });
        let msg: ServerMessage = serde_json::from_value(raw).unwrap();
        let ServerMessage::GameStateUpdate(delta) = msg else {
            panic!("expected GameStateUpdate");
        };
        assert_eq!(delta.customer_orders, Some(vec![]));
        assert!(delta.round.is_none());
    }

    #[test]
    fn malformed_snapshot_fails_closed() {
        // Missing required `round` — the whole event must fail, not
        // partially apply.
        let raw = serde_json::json!({
            "type": "game_state",
            "data": { "max_rounds": 3, "current_phase": "waiting" }
        });
        assert!(serde_json::from_value::<ServerMessage>(raw).is_err());
    }

    #[test]
    fn time_response_uses_camel_case_keys() {
        let raw = serde_json::json!({
            "type": "time_response",
            "data": { "phase": "round", "roundTimeRemaining": 381, "ovenTime": 12 }
        });
        let msg: ServerMessage = serde_json::from_value(raw).unwrap();
        let ServerMessage::TimeResponse(sync) = msg else {
            panic!("expected TimeResponse");
        };
        assert_eq!(sync.round_time_remaining, 381);
        assert_eq!(sync.oven_time, 12);
    }

    #[test]
    fn round_result_round3_fields_are_optional() {
        let raw = serde_json::json!({
            "type": "round_ended",
            "data": {
                "completed_pizzas_count": 4,
                "wasted_pizzas_count": 1,
                "unsold_pizzas_count": 2,
                "ingredients_left_count": 3,
                "score": 17
            }
        });
        let msg: ServerMessage = serde_json::from_value(raw).unwrap();
        let ServerMessage::RoundEnded(result) = msg else {
            panic!("expected RoundEnded");
        };
        assert_eq!(result.score, 17);
        assert!(result.fulfilled_orders_count.is_none());
    }

    #[test]
    fn ingredient_counts_tally() {
        let ingredients = vec![
            Ingredient {
                id: "a".into(),
                kind: IngredientType::Base,
            },
            Ingredient {
                id: "b".into(),
                kind: IngredientType::Sauce,
            },
            Ingredient {
                id: "c".into(),
                kind: IngredientType::Ham,
            },
            Ingredient {
                id: "d".into(),
                kind: IngredientType::Ham,
            },
        ];
        let counts = IngredientCounts::tally(&ingredients);
        assert_eq!(counts.base, 1);
        assert_eq!(counts.sauce, 1);
        assert_eq!(counts.ham, 2);
        assert_eq!(counts.pineapple, 0);
    }

    #[test]
    fn oven_switch_round_trip() {
        let json = serde_json::to_string(&ClientMessage::ToggleOven {
            state: OvenSwitch::On,
        })
        .unwrap();
        assert!(json.contains(r#""state":"on""#));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back,
            ClientMessage::ToggleOven {
                state: OvenSwitch::On
            }
        );
    }
}
