pub mod config;
pub mod error;
pub mod storage;

pub use error::{Result, StorageError};
pub use storage::{ProjectStorage, SourcePathCache};
