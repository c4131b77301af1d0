pub mod cli;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod geometry;
pub mod hamming;
pub mod matcher;
pub mod phash;
pub mod pipeline;
pub mod rectify;
pub mod report;
pub mod segment;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use error::DetectError;
pub use pipeline::{Pipeline, PipelineConfig};
pub use store::{ReferenceStore, StoreBuilder};
