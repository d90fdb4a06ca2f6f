//! # Pizza Kitchen Client
//!
//! Transport-agnostic Rust client for the pizza kitchen multiplayer game
//! protocol.
//!
//! This crate provides a high-level async client that keeps a local replica
//! of a shared kitchen simulation in sync with the server over any
//! bidirectional JSON text transport, reconciling optimistic local actions
//! against authoritative server events.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] trait for any
//!   backend, and the [`Connector`] trait to control how (re)connections are
//!   dialed
//! - **Wire-compatible** — all protocol types match the server's event
//!   format exactly
//! - **WebSocket built-in** — default `transport-websocket` feature provides
//!   `WebSocketTransport` and `WebSocketConnector`
//! - **Event-driven** — receive typed [`KitchenEvent`]s via a channel and
//!   render from the reconciled state
//! - **Self-healing** — automatic reconnect with capped backoff, durable
//!   room rejoin, and optimistic-action rollback on every fresh snapshot
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pizza_kitchen_client::{KitchenClient, KitchenConfig, KitchenEvent, WebSocketConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pizza_kitchen_client::KitchenError> {
//!     let connector = WebSocketConnector::new("ws://localhost:5000/game");
//!     let (client, mut events) = KitchenClient::start(connector, KitchenConfig::new());
//!
//!     client.join_room("kitchen-7")?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             KitchenEvent::StateChanged => {
//!                 if let Some(view) = client.local_view().await {
//!                     println!("round {} — {} orders", view.round, view.customer_orders.len());
//!                 }
//!             }
//!             KitchenEvent::Disconnected { .. } => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod event;
pub mod moderation;
pub mod optimistic;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;
pub mod transports;
pub mod view;

// Re-export primary types for ergonomic imports.
pub use client::{KitchenClient, KitchenConfig};
pub use error::{KitchenError, Result};
pub use event::KitchenEvent;
pub use moderation::{NoopChecker, ProfanityChecker};
pub use optimistic::{ActionKind, OptimisticAction, OptimisticTracker};
pub use protocol::{ClientMessage, GameState, ServerMessage};
pub use session::{ConnectionState, FileRoomStore, MemoryRoomStore, RoomStore};
pub use state::StateStore;
pub use transport::{BoxTransport, Connector, FallbackConnector, Transport};
pub use view::{select_view, ViewMode, ViewSelector};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
