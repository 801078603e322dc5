//! Embedder-facing facade for the HemoLink offline core.
//!
//! This module wires the durable store and the sync layer into the one
//! object an embedding client talks to:
//! - A lazily opened store handle shared by every component
//! - One sync coordinator per queue kind, so app sessions never share gates
//! - Optimistic enqueue that always hands back an id
//! - Facility-cache access with its advisory staleness signal
//!
//! # Architecture
//! The hub sits between the embedding UI and the core crates. It owns no
//! transport and no UI: uploads go through the injected [`Uploader`]
//! implementations, and outcomes come back through queue counts and the
//! status channel.
//!
//! [`Uploader`]: hemolink_sync::Uploader

pub mod hub;

pub use hub::{HubConfig, OfflineHub};
