pub mod cache;
pub mod config;
pub mod error;
pub mod hls;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod target;
pub mod upstream;
