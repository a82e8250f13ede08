pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod store;
pub mod tenant;
pub mod validate;
pub mod wal;

pub use config::Config;
pub use engine::{Engine, EngineError};
pub use store::{Ledger, Store, StoreError};
