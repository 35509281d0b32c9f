//! Membership lifecycle and identity pool engine for a single gym.
//!
//! Pure rules live in [`lifecycle`]; [`repositories`] persists them
//! atomically; [`services`] runs the request handlers that every entry point
//! goes through.

pub mod clock;
pub mod lifecycle;
pub mod models;
pub mod repositories;
pub mod services;
pub mod settings;
