//! Phase-dependent view selection.
//!
//! A pure derivation from `(round, phase, max_rounds)` — no transition events
//! exist. [`ViewSelector`] remembers only the last computed mode to suppress
//! redundant re-render notifications; correctness never depends on that
//! memory.

use crate::protocol::{GameState, Phase};

/// Which builder layout is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    /// Round 1 (and waiting): each player builds on their own board.
    SoloBuilder,
    /// Rounds 2+: one shared builder per player, visible to everyone.
    SharedBuilders,
}

/// Reflection text shown during a debrief overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebriefContent {
    pub question: &'static str,
    pub quote: &'static str,
}

/// Derive the active layout. Priority order:
///
/// 1. Debrief before the final round → shared builders (the debrief overlay
///    is reported separately by [`debrief_overlay`]).
/// 2. Round 2+ → shared builders.
/// 3. Otherwise → solo builder.
pub fn select_view(round: u32, phase: Phase, max_rounds: u32) -> ViewMode {
    if phase == Phase::Debrief && round < max_rounds {
        ViewMode::SharedBuilders
    } else if round > 1 {
        ViewMode::SharedBuilders
    } else {
        ViewMode::SoloBuilder
    }
}

/// The customer-order board is an additive overlay, active only during the
/// final round's play phase, independent of the builder layout.
pub fn order_board_active(round: u32, phase: Phase) -> bool {
    round == 3 && phase == Phase::Round
}

/// Debrief overlay content, keyed by round number. Active only in debriefs
/// that precede another round; the final debrief flows into the game reset
/// instead.
pub fn debrief_overlay(round: u32, phase: Phase, max_rounds: u32) -> Option<DebriefContent> {
    if phase == Phase::Debrief && round < max_rounds {
        Some(debrief_content(round))
    } else {
        None
    }
}

/// Per-round reflection text, with generic fallback for unknown rounds.
pub fn debrief_content(round: u32) -> DebriefContent {
    match round {
        1 => DebriefContent {
            question: "Reflect on the round: How did you identify and streamline your \
                       pizza-making process? Did the oven's WIP limit of 3 pizzas affect \
                       your strategy?",
            quote: "\u{201c}Working software is the primary measure of progress.\u{201d} \
                    \u{2013} Agile Manifesto. In this case, think of 'working software' as \
                    successfully baked pizzas!",
        },
        2 => DebriefContent {
            question: "Reflect on the round: How did collaboration with your team impact \
                       your pizza production? Did sharing builders help or hinder your flow?",
            quote: "\u{201c}Individuals and interactions over processes and tools.\u{201d} \
                    \u{2013} Agile Manifesto. Collaboration is key to adapting and improving!",
        },
        3 => DebriefContent {
            question: "Reflect on the round: How did customer orders change your priorities? \
                       Were you able to balance order fulfillment with minimizing waste?",
            quote: "\u{201c}Customer collaboration over contract negotiation.\u{201d} \
                    \u{2013} Agile Manifesto. Meeting customer needs drives success!",
        },
        _ => DebriefContent {
            question: "Reflect on the round.",
            quote: "\u{201c}Continuous improvement is better than delayed perfection.\u{201d} \
                    \u{2013} Agile principle.",
        },
    }
}

/// Recomputes the view on every state change and reports whether it changed.
#[derive(Debug, Default)]
pub struct ViewSelector {
    last: Option<ViewMode>,
}

impl ViewSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute from the given state. Returns `Some(mode)` when the mode
    /// differs from the previously computed one (or on the first call),
    /// `None` when a re-render would be redundant.
    pub fn update(&mut self, state: &GameState) -> Option<ViewMode> {
        let mode = select_view(state.round, state.current_phase, state.max_rounds);
        if self.last == Some(mode) {
            None
        } else {
            self.last = Some(mode);
            Some(mode)
        }
    }

    /// The last computed mode, if any state has been seen.
    pub fn current(&self) -> Option<ViewMode> {
        self.last
    }

    /// Forget the last mode (room change), forcing the next update to report.
    pub fn reset(&mut self) {
        self.last = None;
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
    fn round_one_play_is_solo() {
        assert_eq!(select_view(1, Phase::Round, 3), ViewMode::SoloBuilder);
        assert_eq!(select_view(1, Phase::Waiting, 3), ViewMode::SoloBuilder);
    }

    #[test]
    fn mid_game_debrief_is_shared_with_overlay() {
        assert_eq!(select_view(2, Phase::Debrief, 3), ViewMode::SharedBuilders);
        let content = debrief_overlay(2, Phase::Debrief, 3);
        assert!(content.is_some());
        assert_eq!(content, Some(debrief_content(2)));
    }

    #[test]
    fn first_round_debrief_is_shared() {
        // Debrief rule outranks the round>1 rule.
        assert_eq!(select_view(1, Phase::Debrief, 3), ViewMode::SharedBuilders);
    }

    #[test]
    fn round_three_play_is_shared_with_order_board() {
        assert_eq!(select_view(3, Phase::Round, 3), ViewMode::SharedBuilders);
        assert!(order_board_active(3, Phase::Round));
    }

    #[test]
    fn final_debrief_has_no_overlay() {
        // round == max_rounds: no debrief-overlay branch.
        assert_eq!(select_view(3, Phase::Debrief, 3), ViewMode::SharedBuilders);
        assert!(debrief_overlay(3, Phase::Debrief, 3).is_none());
    }

    #[test]
    fn order_board_is_independent_of_phase_rules() {
        assert!(!order_board_active(3, Phase::Debrief));
        assert!(!order_board_active(2, Phase::Round));
        assert!(!order_board_active(3, Phase::Waiting));
    }

    #[test]
    fn unknown_round_gets_generic_debrief_text() {
        let content = debrief_content(7);
        assert_eq!(content.question, "Reflect on the round.");
    }

    #[test]
    fn selector_suppresses_redundant_updates() {
        let mut selector = ViewSelector::new();
        let state = GameState {
            round: 1,
            current_phase: Phase::Round,
            ..GameState::default()
        };
        assert_eq!(selector.update(&state), Some(ViewMode::SoloBuilder));
        assert_eq!(selector.update(&state), None);

        let state = GameState {
            round: 2,
            current_phase: Phase::Round,
            ..GameState::default()
        };
        assert_eq!(selector.update(&state), Some(ViewMode::SharedBuilders));
        assert_eq!(selector.current(), Some(ViewMode::SharedBuilders));

        selector.reset();
        assert_eq!(selector.update(&state), Some(ViewMode::SharedBuilders));
    }
}
