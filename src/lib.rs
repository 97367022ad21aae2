//! Webhook-driven orchestration core: task planning, Cloud Agent dispatch,
//! conversation analysis, and quality-gated completion. See `main.rs` for
//! the process entry points (`serve`, `sweep`, `config show`) and how this
//! library's pieces are wired together.

pub mod domain;
pub mod infrastructure;
pub mod services;
