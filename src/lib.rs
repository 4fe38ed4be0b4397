//! Batch image optimizer for generated documents
//!
//! Every raster image embedded in one document (order confirmations, shipping
//! labels, ...) is classified, resized and re-encoded under a single shared
//! optimization profile before the document is assembled. Identical sources
//! are compressed once, failures fall back to the original bytes, and
//! size/quality tradeoffs are recorded per image and per batch.

pub mod cache;
pub mod classifier;
pub mod compressor;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod models;
pub mod pool;
pub mod profile;
pub mod validation;

pub use error::{Error, Result};
