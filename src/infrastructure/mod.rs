//! Infrastructure layer: adapters implementing the domain's port traits, plus
//! config loading and logging setup.

pub mod config;
pub mod events;
pub mod logging;
pub mod redis_store;

pub use events::BroadcastEventBus;
pub use redis_store::RedisStateStore;
