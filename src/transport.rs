//! Transport abstraction for the pizza kitchen protocol.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between the client and the game server. The protocol uses JSON text
//! messages, so every transport implementation must handle message framing
//! internally (WebSocket frames, long-poll batches, length-prefixed TCP).
//! The transport must deliver messages reliably and in order per connection;
//! reordering across a reconnect is acceptable because every reconnect forces
//! a fresh snapshot request.
//!
//! [`Connector`] is the reconnection seam: it produces a fresh connected
//! transport on demand, letting the client retry after a drop without knowing
//! connection parameters. A connector may try several transports in
//! preference order (message-based first, polling fallback).

use async_trait::async_trait;

use crate::error::KitchenError;

/// A bidirectional text message transport for the kitchen protocol.
///
/// Implementors shuttle serialized JSON strings between the client and server.
/// Each call to [`send`](Transport::send) transmits one complete JSON message.
/// Each call to [`recv`](Transport::recv) returns one complete JSON message.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is
/// used inside `tokio::select!`. If `recv` is cancelled before completion,
/// calling it again must not lose data. Channel-based implementations are
/// naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`KitchenError::TransportSend`] if the message could not be
    /// sent (connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), KitchenError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, KitchenError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations
    /// should still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), KitchenError>;
}

/// Boxed transport, as produced by a [`Connector`].
pub type BoxTransport = Box<dyn Transport>;

/// Produces a fresh connected transport for each (re)connection attempt.
///
/// Connection setup is intentionally not part of [`Transport`] — different
/// transports have fundamentally different connection parameters. A connector
/// captures those parameters once and reconnects on demand.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a new connection.
    ///
    /// # Errors
    ///
    /// Returns a transport-level error when no connection could be
    /// established; the client retries with backoff.
    async fn connect(&self) -> Result<BoxTransport, KitchenError>;
}

/// Tries each inner connector in order, returning the first that succeeds.
///
/// This is how the message-based transport is preferred with a polling
/// fallback: list the WebSocket connector first and the polling connector
/// second.
pub struct FallbackConnector {
    connectors: Vec<Box<dyn Connector>>,
}

impl FallbackConnector {
    pub fn new(connectors: Vec<Box<dyn Connector>>) -> Self {
        Self { connectors }
    }
}

#[async_trait]
impl Connector for FallbackConnector {
    async fn connect(&self) -> Result<BoxTransport, KitchenError> {
        let mut last_err = KitchenError::NotConnected;
        for connector in &self.connectors {
            match connector.connect().await {
                Ok(transport) => return Ok(transport),
                Err(e) => {
                    tracing::debug!("connector failed, trying next: {e}");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

impl std::fmt::Debug for FallbackConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackConnector")
            .field("connectors", &self.connectors.len())
            .finish()
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

    struct NeverConnects;

    #[async_trait]
    impl Connector for NeverConnects {
        async fn connect(&self) -> Result<BoxTransport, KitchenError> {
            Err(KitchenError::TransportSend("unreachable".into()))
        }
    }

    struct AlwaysConnects;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&mut self, _message: String) -> Result<(), KitchenError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, KitchenError>> {
            None
        }

        async fn close(&mut self) -> Result<(), KitchenError> {
            Ok(())
        }
    }

    #[async_trait]
    impl Connector for AlwaysConnects {
        async fn connect(&self) -> Result<BoxTransport, KitchenError> {
            Ok(Box::new(NullTransport))
        }
    }

    #[tokio::test]
    async fn fallback_uses_second_connector_when_first_fails() {
        let connector =
            FallbackConnector::new(vec![Box::new(NeverConnects), Box::new(AlwaysConnects)]);
        assert!(connector.connect().await.is_ok());
    }

    #[tokio::test]
    async fn fallback_reports_last_error_when_all_fail() {
        let connector = FallbackConnector::new(vec![Box::new(NeverConnects)]);
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, KitchenError::TransportSend(_)));
    }

    #[tokio::test]
    async fn empty_fallback_is_not_connected() {
        let connector = FallbackConnector::new(vec![]);
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, KitchenError::NotConnected));
    }
}
