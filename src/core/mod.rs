pub mod board;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod message;
pub mod publisher;
pub mod retry;
pub mod subscriber;
pub mod timers;
