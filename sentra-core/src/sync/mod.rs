//! Talking to the coordinator: the HTTP client and export materialization.

pub mod client;
pub mod export;

pub use client::SentraClient;
pub use export::{export_target, sync_target, Decryptor};
