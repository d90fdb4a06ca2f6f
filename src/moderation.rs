//! Advisory room-name screening.
//!
//! The profanity check is an external collaborator consulted before a room
//! name is submitted. It is advisory only and fails open: an unreachable or
//! slow checker never blocks the join, because the server remains the final
//! authority on room validity.

use async_trait::async_trait;
use tracing::warn;

use crate::error::{KitchenError, Result};

/// External profanity-check collaborator.
///
/// Implementations typically wrap an HTTP lookup. The check races freely with
/// user resubmission; no ordering is guaranteed or needed.
#[async_trait]
pub trait ProfanityChecker: Send + Sync {
    /// Returns `Ok(true)` when the text contains profanity.
    ///
    /// # Errors
    ///
    /// Any error is treated as "check unavailable" by the caller and the text
    /// passes (fail-open).
    async fn contains_profanity(&self, text: &str) -> Result<bool>;
}

/// A checker that approves everything. Useful default and test double.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopChecker;

#[async_trait]
impl ProfanityChecker for NoopChecker {
    async fn contains_profanity(&self, _text: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Validate a room name before submission.
///
/// Trims whitespace, rejects empty names, and consults the advisory checker.
/// A checker failure is logged and ignored — the trimmed name passes.
///
/// # Errors
///
/// Returns [`KitchenError::RoomNameRejected`] when the name is empty or the
/// checker flags it.
pub async fn screen_room_name(name: &str, checker: &dyn ProfanityChecker) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(KitchenError::RoomNameRejected {
            reason: "Room name cannot be empty.".into(),
        });
    }
    match checker.contains_profanity(trimmed).await {
        Ok(true) => Err(KitchenError::RoomNameRejected {
            reason: "Room name contains inappropriate language. Please choose another.".into(),
        }),
        Ok(false) => Ok(trimmed.to_string()),
        Err(e) => {
            warn!("profanity check failed, allowing room name: {e}");
            Ok(trimmed.to_string())
        }
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

    struct FixedChecker(bool);

    #[async_trait]
    impl ProfanityChecker for FixedChecker {
        async fn contains_profanity(&self, _text: &str) -> Result<bool> {
            Ok(self.0)
        }
    }

    struct BrokenChecker;

    #[async_trait]
    impl ProfanityChecker for BrokenChecker {
        async fn contains_profanity(&self, _text: &str) -> Result<bool> {
            Err(KitchenError::Timeout)
        }
    }

    #[tokio::test]
    async fn clean_name_passes_trimmed() {
        let name = screen_room_name("  kitchen-7  ", &NoopChecker).await.unwrap();
        assert_eq!(name, "kitchen-7");
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let err = screen_room_name("   ", &NoopChecker).await.unwrap_err();
        assert!(matches!(err, KitchenError::RoomNameRejected { .. }));
    }

    #[tokio::test]
    async fn flagged_name_is_rejected() {
        let err = screen_room_name("rude-name", &FixedChecker(true))
            .await
            .unwrap_err();
        assert!(matches!(err, KitchenError::RoomNameRejected { .. }));
    }

    #[tokio::test]
    async fn unreachable_checker_fails_open() {
        let name = screen_room_name("kitchen-7", &BrokenChecker).await.unwrap();
        assert_eq!(name, "kitchen-7");
    }
}
