//! # Tilestream I/O
//!
//! Everything that brings tile payloads in from outside: fetchers for HTTP,
//! local files and in-memory datasets, tile URL templates, and the JSON source
//! configuration.

pub mod fetch;
pub mod source;
pub mod url;

pub use fetch::{FetchError, FileFetcher, HttpFetcher, MemoryFetcher, TileFetcher};
pub use source::{ConfigError, SourceConfig};
pub use url::UrlTemplate;
