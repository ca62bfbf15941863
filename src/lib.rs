//! Wardrobe Sync
//!
//! Offline-first data layer for the wardrobe journal: a local SQLite cache,
//! synchronizing record stores for outfits and collections, and a lazy image
//! loader backed by the same cache.

pub mod config;
pub mod db;
pub mod errors;
pub mod images;
pub mod models;
pub mod remote;
pub mod service;
pub mod sync;

pub use service::WardrobeSync;
