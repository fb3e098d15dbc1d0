//! # Hip Metrics Common Library
//!
//! Shared code for the hip metrics workspace:
//! - Error type and result alias
//! - Configuration resolution (explicit > ENV > TOML > compiled defaults)
//! - Event types (HipmEvent enum) and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventBus, HipmEvent};
