pub mod client;
pub mod rate_limiter;
pub mod retry;

pub use client::HttpAgentClient;
