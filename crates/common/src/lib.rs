pub mod config;
pub mod error;
pub mod notify;
pub mod redis_pool;
pub mod types;

pub use error::{AppError, Result};
