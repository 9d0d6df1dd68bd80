pub mod config;
pub mod models;
pub mod plugins;
pub mod scheduler;
pub mod scraper;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use scheduler::{CycleOutcome, CycleReport, CycleScheduler, Pacing, PollingScheduler, Trigger};
pub use store::{DedupStore, SqliteDedupStore};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
