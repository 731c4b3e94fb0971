#![doc = "Common types shared across the latency bench workspace."]

pub mod config;
pub mod error;
pub mod record;
pub mod state;
pub mod time;
pub mod types;

pub use config::*;
pub use error::*;
pub use record::*;
pub use state::*;
pub use time::*;
pub use types::*;
