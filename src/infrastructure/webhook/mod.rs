pub mod server;
pub mod signature;

pub use server::{router, WebhookState};
