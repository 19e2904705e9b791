//! Data Transfer Objects
//!
//! Payloads exchanged between the supervisor status API and its clients.

pub mod status;
