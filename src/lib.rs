pub mod batch;
pub mod config;
pub mod constants;
pub mod date_filter;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod renderer;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod types;
