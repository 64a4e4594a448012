//! Check-in photo compositor.
//!
//! Aligns a user photo against a reference screenshot (pan, zoom, crop),
//! rasterizes the side-by-side composite and publishes it to an object store,
//! queueing it locally while offline.

pub mod app;
pub mod bridge;
pub mod compositor;
pub mod config;
pub mod encode;
pub mod error;
pub mod interaction;
pub mod loader;
pub mod local;
pub mod points;
pub mod session;
pub mod status;
pub mod storage;
pub mod transform;
pub mod watcher;
