//! Live session tracking for connected players.
//!
//! The registry is the single source of truth mapping connection identifiers
//! to in-memory player state. It is owned by the session engine behind an
//! `RwLock`; background tasks and broadcast construction always re-fetch
//! entries by identifier instead of holding references across await points.

use log::info;
use shared::{Position, PublicPlayer, TrainerProfile};
use std::collections::HashMap;
use std::time::Instant;

/// The transient runtime binding between one open connection and its
/// trainer profile. Exactly one may exist per connection identifier.
#[derive(Debug, Clone)]
pub struct LiveSession {
    pub conn_id: u32,
    /// Exclusively owned profile document; synced from the live fields
    /// before every save.
    pub profile: TrainerProfile,
    pub x: i32,
    pub y: i32,
    pub map_id: String,
    pub connected_at: Instant,
    /// Play-time snapshot taken at connect; accumulated time is
    /// `play_time_at_connect + elapsed` on every sync.
    pub play_time_at_connect: u64,
}

impl LiveSession {
    pub fn new(conn_id: u32, profile: TrainerProfile) -> Self {
        let position = profile.trainer.position;
        let map_id = profile.trainer.map_id.clone();
        let play_time_at_connect = profile.trainer.play_time;
        LiveSession {
            conn_id,
            profile,
            x: position.x,
            y: position.y,
            map_id,
            connected_at: Instant::now(),
            play_time_at_connect,
        }
    }

    /// Folds the live fields back into the owned profile document.
    /// Play time never decreases within a session.
    pub fn sync_profile(&mut self) {
        self.profile.trainer.position = Position {
            x: self.x,
            y: self.y,
        };
        self.profile.trainer.map_id = self.map_id.clone();

        let accumulated = self.play_time_at_connect + self.connected_at.elapsed().as_secs();
        if accumulated > self.profile.trainer.play_time {
            self.profile.trainer.play_time = accumulated;
        }
    }

    pub fn public_view(&self) -> PublicPlayer {
        PublicPlayer {
            x: self.x,
            y: self.y,
            name: self.profile.trainer.name.clone(),
            sprite: self.profile.trainer.sprite.clone(),
            map_id: self.map_id.clone(),
            trainer_id: self.profile.trainer.id.clone(),
        }
    }
}

/// All live sessions, indexed by connection identifier.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<u32, LiveSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry::default()
    }

    pub fn insert(&mut self, session: LiveSession) {
        info!(
            "session registered: connection {} as {} at ({}, {})",
            session.conn_id, session.profile.trainer.name, session.x, session.y
        );
        self.sessions.insert(session.conn_id, session);
    }

    pub fn get(&self, conn_id: u32) -> Option<&LiveSession> {
        self.sessions.get(&conn_id)
    }

    pub fn get_mut(&mut self, conn_id: u32) -> Option<&mut LiveSession> {
        self.sessions.get_mut(&conn_id)
    }

    pub fn remove(&mut self, conn_id: u32) -> Option<LiveSession> {
        let removed = self.sessions.remove(&conn_id);
        if removed.is_some() {
            info!("session removed: connection {conn_id}");
        }
        removed
    }

    pub fn contains(&self, conn_id: u32) -> bool {
        self.sessions.contains_key(&conn_id)
    }

    /// Projects the broadcast-safe view of every session from one
    /// consistent point in time (the caller's lock guard).
    pub fn public_players(&self) -> HashMap<u32, PublicPlayer> {
        self.sessions
            .iter()
            .map(|(conn_id, session)| (*conn_id, session.public_view()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
