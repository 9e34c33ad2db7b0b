//! # Grid World Session Server
//!
//! Authoritative server for the tile-based multiplayer world. It owns the
//! canonical world grid, every live player session, and the persistent
//! trainer profiles on disk; clients only render what the server tells them.
//!
//! ## Core Responsibilities
//!
//! ### World Authority
//! The world grid is generated once at startup and shared read-only with
//! every session. All movement is validated server-side against tile
//! walkability and grid bounds before any position changes.
//!
//! ### Session Lifecycle
//! The engine handles the full lifespan of a connection: profile resolution
//! on connect, gated movement until onboarding completes, checkpoint saves
//! on gameplay milestones, and a final flush plus broadcast on disconnect.
//!
//! ### Persistence
//! Trainer profiles are JSON documents saved atomically (temp file plus
//! rename) with stable key order. Each live session also has a recurring
//! autosave task so a crash loses at most one interval of progress.
//!
//! ## Module Organization
//!
//! - [`world`]: grid generation, walkability, spawn-point search
//! - [`store`]: profile documents on disk, name lookup, quarantine, merge
//! - [`registry`]: live sessions and their broadcast-safe projections
//! - [`autosave`]: per-connection recurring persistence tasks
//! - [`engine`]: the command loop tying all of the above together
//! - [`net`]: newline-delimited-JSON TCP transport
//!
//! ## Concurrency Model
//!
//! One engine task consumes a command channel fed by the transport; the
//! registry sits behind an `RwLock` shared only with autosave tasks. Any
//! code that saves a profile clones a snapshot inside the lock guard and
//! performs the write outside it, re-fetching the session by identifier
//! afterwards rather than holding a reference across an await.

pub mod autosave;
pub mod engine;
pub mod net;
pub mod registry;
pub mod store;
pub mod world;

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch; clamps to zero on a pre-epoch clock.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
