pub mod client;

pub use client::HttpLlmClient;
