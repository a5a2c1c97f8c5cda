pub mod model;
pub mod ops;

pub use model::{HydratedSnapshot, QueueState, Revision, StoredQueue, Track, INITIAL_REVISION};
pub use ops::{AddPosition, PreviousAction, MAX_SHUFFLE_ATTEMPTS, RESTART_THRESHOLD_SECS};
