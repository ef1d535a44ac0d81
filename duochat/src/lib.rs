//! `DuoChat` — one-to-one messaging client library.

pub mod chat;
pub mod config;
pub mod directory;
pub mod notify;
pub mod transport;
