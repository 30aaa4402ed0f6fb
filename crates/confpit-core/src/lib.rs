//! # confpit-core
//!
//! Core types, traits, and primitives shared by every confpit crate: the
//! error taxonomy, the `Settings` mapping and its merge rules, the
//! environment overlay, and the `Source` contract that concrete
//! configuration providers implement.

pub mod env;
pub mod error;
pub mod settings;
pub mod source;

pub use env::EnvOverlay;
pub use error::{PitError, Result};
pub use settings::{Settings, get_path, merge_into, normalize_keys};
pub use source::{ChangeHandler, Source, WatchGuard};
