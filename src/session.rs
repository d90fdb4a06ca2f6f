//! Session state: connection lifecycle and the persisted room key.
//!
//! The last-joined room name is kept under a single durable key so the client
//! can rejoin after a reconnect or a full process restart. It is cleared only
//! by explicit user action ([`crate::KitchenClient::leave_room`]) or a
//! server-issued `room_expired` notice.

use std::path::PathBuf;
use std::sync::Mutex;

use tracing::debug;

use crate::error::Result;

/// Transport session lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// First connection attempt in progress.
    #[default]
    Connecting,
    /// Transport is up.
    Connected,
    /// Transport dropped; no retry running.
    Disconnected,
    /// Transport dropped; automatic retry in progress.
    Reconnecting,
}

/// Durable storage for the last-joined room name.
///
/// One key, read at startup and on every reconnect attempt.
pub trait RoomStore: Send + Sync {
    /// The persisted room name, if any.
    fn load(&self) -> Option<String>;

    /// Persist `room` as the last-joined room.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing storage cannot be written.
    fn save(&self, room: &str) -> Result<()>;

    /// Forget the persisted room.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing storage cannot be written.
    fn clear(&self) -> Result<()>;
}

/// File-backed [`RoomStore`]; survives process restart.
#[derive(Debug)]
pub struct FileRoomStore {
    path: PathBuf,
}

impl FileRoomStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RoomStore for FileRoomStore {
    fn load(&self) -> Option<String> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        let room = contents.trim();
        if room.is_empty() {
            None
        } else {
            Some(room.to_string())
        }
    }

    fn save(&self, room: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, room)?;
        debug!(room, path = %self.path.display(), "persisted room");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory [`RoomStore`] for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryRoomStore {
    room: Mutex<Option<String>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the persisted room, as if an earlier session had saved it.
    pub fn with_room(room: impl Into<String>) -> Self {
        Self {
            room: Mutex::new(Some(room.into())),
        }
    }
}

impl RoomStore for MemoryRoomStore {
    fn load(&self) -> Option<String> {
        self.room.lock().ok()?.clone()
    }

    fn save(&self, room: &str) -> Result<()> {
        if let Ok(mut slot) = self.room.lock() {
            *slot = Some(room.to_string());
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if let Ok(mut slot) = self.room.lock() {
            *slot = None;
        }
        Ok(())
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
    fn memory_store_round_trip() {
        let store = MemoryRoomStore::new();
        assert!(store.load().is_none());
        store.save("kitchen-7").unwrap();
        assert_eq!(store.load().as_deref(), Some("kitchen-7"));
        store.clear().unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("room");
        {
            let store = FileRoomStore::new(&path);
            store.save("kitchen-7").unwrap();
        }
        let store = FileRoomStore::new(&path);
        assert_eq!(store.load().as_deref(), Some("kitchen-7"));
    }

    #[test]
    fn file_store_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRoomStore::new(dir.path().join("room"));
        store.clear().unwrap();
        store.save("a").unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn file_store_ignores_blank_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("room");
        std::fs::write(&path, "  \n").unwrap();
        let store = FileRoomStore::new(&path);
        assert!(store.load().is_none());
    }
}
