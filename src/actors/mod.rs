// ============================================================================
// Actors Module
// ============================================================================
//
// Actor-based infrastructure for work that runs after a transaction commits.
//
// - outbox_relay   - publishes committed outbox events to the event sink
// - rating_refresh - best-effort rating recomputation after completion
//
// Note: Domain logic (OrderLifecycle) does NOT run inside actors.
//       Actors are reserved for infrastructure concerns only.
//
// ============================================================================

mod outbox_relay;
mod rating_refresh;

pub use outbox_relay::{relay_once, FlushOutbox, OutboxRelayActor, RelayConfig, RelayReport};
pub use rating_refresh::{RatingRefreshActor, RefreshRatings};
