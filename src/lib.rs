pub mod commands_step8;
pub mod config;
pub mod db;
pub mod error;
pub mod id;
pub mod logging;
pub mod migrate;
pub mod model_step8;
pub mod repo_step8;
pub mod step8_report;
pub mod time;

pub use error::{AppError, AppResult, ErrorKind};
pub use model_step8::{
    AmendsEntry, EntryPatch, Inventory, InventoryStatus, NewAmendsEntry, Priority, Progress,
    WillingnessStatus,
};
pub use repo_step8::{InventoryRepository, SqliteInventoryRepository};
pub use step8_report::{AmendsHandoff, AmendsStats, EntryFilter, PriorityCounts};

