pub mod controller;
pub mod debounce;
pub mod tab_bus;
pub mod transport;

pub use controller::{ClientQueueController, QueueView, Visibility};
pub use transport::{FetchOutcome, HttpTransport, PushOutcome, QueueTransport, ServiceTransport, TransportError};
