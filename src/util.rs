//! Shared utility modules used across Lexis components.

pub mod varint;
