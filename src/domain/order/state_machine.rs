use super::errors::LifecycleError;
use super::value_objects::{ActorRole, OrderStatus};

// ============================================================================
// Order State Machine
// ============================================================================
//
// Two independent pure decisions:
// 1. Edge legality: may an order move from one status to another?
// 2. Cancellation policy: may this kind of actor cancel from this status?
//
// The orchestrator composes them; neither knows about the other.
//
// ============================================================================

pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Outgoing edges of `status`. Empty for terminal states.
    pub fn valid_next_states(status: OrderStatus) -> &'static [OrderStatus] {
        use OrderStatus::*;

        match status {
            Pending => &[Accepted, Rejected, Cancelled],
            Accepted => &[Assigned, Cancelled],
            Assigned => &[EnRoute, Cancelled],
            EnRoute => &[Delivered, Cancelled],
            Delivered => &[Completed],
            Completed | Rejected | Cancelled => &[],
        }
    }

    /// Same-status requests are accepted as idempotent no-ops.
    pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
        from == to || Self::valid_next_states(from).contains(&to)
    }

    pub fn validate_transition(from: OrderStatus, to: OrderStatus) -> Result<(), LifecycleError> {
        if Self::is_valid_transition(from, to) {
            Ok(())
        } else {
            Err(LifecycleError::InvalidTransition {
                from,
                to,
                allowed: Self::valid_next_states(from).to_vec(),
            })
        }
    }

    /// Who may cancel from where. Admins are not covered by the policy and
    /// cancel through an explicit status transition instead.
    pub fn can_cancel(status: OrderStatus, actor: ActorRole) -> bool {
        use OrderStatus::*;

        match actor {
            ActorRole::Customer => matches!(status, Pending | Accepted),
            ActorRole::Vendor => matches!(status, Pending | Accepted | Assigned),
            ActorRole::Provider => matches!(status, Assigned),
            ActorRole::Admin => false,
        }
    }

    pub fn validate_cancellation(status: OrderStatus, actor: ActorRole) -> Result<(), LifecycleError> {
        if Self::can_cancel(status, actor) {
            Ok(())
        } else {
            Err(LifecycleError::CancellationDenied { actor, status })
        }
    }
}
