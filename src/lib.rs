//! Captures one-time verification codes from mail-to-webhook deliveries and
//! keeps the latest code per recipient address in a shared, file-backed store.

pub mod config;
pub mod server;
pub mod storage;
pub mod utils;
