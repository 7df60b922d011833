//! Configuration types and re-exports

pub use super::{
    ApiConfig, AppConfig, DashboardConfig, LoggingConfig, PersistenceConfig, PollConfig,
    SessionConfig,
};
