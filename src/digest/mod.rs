pub mod audit;
pub mod buffer;
pub mod chunker;
pub mod config;
pub mod ingest;
pub mod job;
pub mod message;
pub mod model;
pub mod paths;
pub mod pipeline;
pub mod prompts;
pub mod run_guard;
pub mod schedule;
pub mod stats;
pub mod util;
pub mod zone;
