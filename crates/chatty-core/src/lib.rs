pub mod config;
pub mod error;
pub mod types;

pub use config::ChattyConfig;
pub use error::{ChattyError, Result};
pub use types::*;
