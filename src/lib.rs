pub mod app;
pub mod barrier;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod metadata;
pub mod output;
pub mod registry;
pub mod resolver;
pub mod sra;
pub mod store;
pub mod sync;
