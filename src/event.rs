//! Events emitted by the client to the presentation adapter.

use std::collections::BTreeMap;

use crate::protocol::{RoundResult, TimeSync};
use crate::view::{DebriefContent, ViewMode};

/// Typed events delivered on the channel returned by
/// [`KitchenClient::start`](crate::KitchenClient::start).
///
/// The presentation adapter renders from the reconciled state (read through
/// the client handle) and uses these events as change notifications and for
/// transient messages. Listeners must be idempotent renderers.
#[derive(Debug, Clone, PartialEq)]
pub enum KitchenEvent {
    /// Transport established (initial connect or successful reconnect).
    Connected,
    /// Transport dropped; an automatic retry is scheduled. Surfaced so the
    /// UI can show an "attempting to reconnect" status. No state is
    /// discarded.
    Reconnecting {
        /// 1-based retry attempt counter.
        attempt: u32,
    },
    /// Transport dropped or the client shut down. Always delivered, even
    /// when the event channel is congested.
    Disconnected { reason: Option<String> },
    /// No persisted room exists — the room picker should open.
    NeedRoomSelection,
    /// Room directory listing: room name → player count.
    RoomList { rooms: BTreeMap<String, u32> },
    /// The server refused the join. Inline form feedback; the persisted room
    /// is left untouched.
    JoinRejected { message: String },
    /// The reconciled state changed; re-read it through the handle.
    StateChanged,
    /// The active builder layout changed (deduplicated against the previous
    /// mode).
    ViewChanged(ViewMode),
    /// A round began. Debrief UI should close.
    RoundStarted { round: u32, duration: u64 },
    /// The round ended; debrief opens with the aggregated result.
    RoundEnded {
        result: RoundResult,
        /// Reflection content for mid-game debriefs; `None` after the final
        /// round.
        debrief: Option<DebriefContent>,
    },
    /// The game was reset to the waiting phase.
    GameReset,
    /// The server refused an optimistic action; the matching pending entry
    /// was rolled back.
    ActionRejected { message: String },
    /// Elapsed-time poll response (once per second).
    TimeSync(TimeSync),
    /// The room no longer exists. The persisted room was cleared and the
    /// room picker should reopen.
    RoomExpired { message: String },
}
