//! Shared protocol definitions for the `DuoChat` wire format.

pub mod identity;
pub mod message;
pub mod wire;
