//! Display stacking order for cards, derived from interaction state.
//!
//! Precedence: dragging > editing > hovered > base. Pure lookup with no
//! hidden state, so repeated calls with the same input are identical.

/// Interaction flags for a single card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InteractionState {
    pub dragging: bool,
    pub editing: bool,
    pub hovered: bool,
}

pub const STACK_BASE: i32 = 1;
pub const STACK_HOVERED: i32 = 100;
pub const STACK_EDITING: i32 = 300;
pub const STACK_DRAGGING: i32 = 1000;

/// Compute the stacking value for a card.
pub fn compute_stack_order(state: InteractionState) -> i32 {
    if state.dragging {
        STACK_DRAGGING
    } else if state.editing {
        STACK_EDITING
    } else if state.hovered {
        STACK_HOVERED
    } else {
        STACK_BASE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        let all = InteractionState {
            dragging: true,
            editing: true,
            hovered: true,
        };
        assert_eq!(compute_stack_order(all), STACK_DRAGGING);

        let editing_hovered = InteractionState {
            dragging: false,
            editing: true,
            hovered: true,
        };
        assert_eq!(compute_stack_order(editing_hovered), STACK_EDITING);

        let hovered = InteractionState {
            hovered: true,
            ..InteractionState::default()
        };
        assert_eq!(compute_stack_order(hovered), STACK_HOVERED);

        assert_eq!(compute_stack_order(InteractionState::default()), STACK_BASE);
    }

    #[test]
    fn test_stable_under_repeated_calls() {
        let state = InteractionState {
            dragging: true,
            ..InteractionState::default()
        };
        let first = compute_stack_order(state);
        for _ in 0..100 {
            assert_eq!(compute_stack_order(state), first);
        }
    }

    #[test]
    fn test_strictly_increasing_tiers() {
        assert!(STACK_BASE < STACK_HOVERED);
        assert!(STACK_HOVERED < STACK_EDITING);
        assert!(STACK_EDITING < STACK_DRAGGING);
    }
}
