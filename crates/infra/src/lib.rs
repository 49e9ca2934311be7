//! Infrastructure layer: transactional store, engine API, scheduler, config.

pub mod config;
pub mod engine;
pub mod scheduler;
pub mod store;

mod integration_tests;

pub use config::{ConfigError, EngineConfig};
pub use engine::stock::StockTransaction;
pub use engine::{Engine, EngineError, Reported, WorkflowEnvelope};
pub use scheduler::{SchedulerHandle, SchedulerStats, TickReport, VenueLoanScheduler};
pub use store::{InMemoryStore, Store, StoreError, Tables};
