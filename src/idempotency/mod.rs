//! Idempotency Coordinator: key hashing, ownership/conflict
//! resolution, and the periodic expiry sweep.

pub mod coordinator;
pub mod fingerprint;
pub mod sweep;

pub use coordinator::{BeginOutcome, Guard, IdempotencyCoordinator};
pub use sweep::spawn_sweep;
