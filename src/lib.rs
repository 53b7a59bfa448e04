//! Queueboard – a live board of message lifecycles for standard and FIFO
//! queues under simulated processing failures.
//!
//! This crate exports
//!  * `core`     – board, lifecycle engine, consumer loops, producer
//!  * `provider` – queue service contract plus in-memory and SQS backends
//!  * `api`      – HTTP surface (dashboard, event stream, enqueue commands)
//!  * `config`   – TOML-driven runtime configuration
//!
//! The binary under `src/bin/` wires these together; tests and other
//! embedders can do the same with [`App::start`].

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod api;
pub mod app;
pub mod config;
pub mod core;
pub mod logging;
pub mod provider;
pub mod util;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use app::App;
pub use config::{load_config, Config};
pub use core::board::{Board, Stage};
pub use core::engine::{Engine, EngineConfig, EngineHandle};
pub use core::message::{Discipline, MessageCard};
pub use core::publisher::{EnqueueReceipt, Producer};
