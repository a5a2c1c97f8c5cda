pub mod cache;
pub mod notifier;
