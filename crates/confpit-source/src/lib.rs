//! # confpit-source
//!
//! Concrete configuration sources: files on disk (JSON, TOML, YAML) with a
//! debounced filesystem watcher, in-memory layers, and fetch-based remote
//! sources. [`SourceSet`] turns search paths into the ordered source list
//! the aggregator merges.

pub mod fetch;
pub mod file;
pub mod memory;
pub mod sourceset;
mod watcher;

pub use fetch::FetchSource;
pub use file::{FileSource, Format, SUPPORTED_EXTENSIONS};
pub use memory::MemorySource;
pub use sourceset::{DEFAULT_NAME, SourceSet};
