pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

// Re-export commonly used types
pub use errors::{CoordinatorError, CoordinatorResult};
pub use services::{SessionHandle, SessionRuntime, SessionSnapshot};
