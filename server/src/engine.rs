//! The session lifecycle engine.
//!
//! A single loop consumes commands from the transport layer, validates them
//! against the world grid, mutates the session registry, and decides what to
//! persist and what to broadcast. Any operation that awaits storage first
//! clones the data it needs inside the registry lock and re-fetches by
//! identifier afterwards; no session reference survives an await point.

use crate::autosave::AutosaveScheduler;
use crate::registry::{LiveSession, SessionRegistry};
use crate::store::ProfileStore;
use crate::world::WorldGrid;
use log::{info, warn};
use serde_json::{json, Value};
use shared::{ClientEvent, Direction, ServerEvent, TrainerProfile, STARTER_SPECIES};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Commands fed to the engine loop by the transport layer.
#[derive(Debug)]
pub enum EngineCommand {
    Event { conn_id: u32, event: ClientEvent },
    /// Transport-level close (EOF, reset). Equivalent to a disconnect event.
    ConnectionClosed { conn_id: u32 },
}

/// Messages the engine hands back to the transport layer. Delivery order is
/// guaranteed per connection only; payloads reflect the registry state at
/// the moment they were constructed.
#[derive(Debug, Clone)]
pub enum Outbound {
    ToClient { conn_id: u32, event: ServerEvent },
    Broadcast { event: ServerEvent },
}

pub struct Engine {
    grid: Arc<WorldGrid>,
    store: ProfileStore,
    registry: Arc<RwLock<SessionRegistry>>,
    autosave: AutosaveScheduler,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Engine {
    pub fn new(
        grid: Arc<WorldGrid>,
        store: ProfileStore,
        autosave: AutosaveScheduler,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Engine {
            grid,
            store,
            registry: Arc::new(RwLock::new(SessionRegistry::new())),
            autosave,
            outbound,
        }
    }

    /// Shared handle to the registry, used by autosave tasks and tests.
    pub fn registry(&self) -> Arc<RwLock<SessionRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Main loop: consumes commands until the transport side hangs up.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<EngineCommand>) {
        while let Some(command) = commands.recv().await {
            self.handle_command(command).await;
        }
        self.autosave.stop_all();
        info!("engine loop stopped");
    }

    pub async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Event { conn_id, event } => match event {
                ClientEvent::Connect { name, sprite } => {
                    self.handle_connect(conn_id, name, sprite).await
                }
                ClientEvent::Move { direction } => self.handle_move(conn_id, direction).await,
                ClientEvent::ChooseStarter { species } => {
                    self.handle_choose_starter(conn_id, species).await
                }
                ClientEvent::MapTransition { map_id } => {
                    self.handle_map_transition(conn_id, map_id).await
                }
                ClientEvent::InventoryChange { inventory } => {
                    self.handle_inventory_change(conn_id, inventory).await
                }
                ClientEvent::BattleEnd { profile_patch } => {
                    self.handle_battle_end(conn_id, profile_patch).await
                }
                ClientEvent::Disconnect => self.handle_disconnect(conn_id).await,
            },
            EngineCommand::ConnectionClosed { conn_id } => self.handle_disconnect(conn_id).await,
        }
    }

    async fn handle_connect(&mut self, conn_id: u32, name: Option<String>, sprite: Option<String>) {
        let name = name.unwrap_or_else(|| shared::DEFAULT_TRAINER_NAME.to_string());
        let sprite = sprite.unwrap_or_else(|| shared::DEFAULT_SPRITE.to_string());

        // A reconnect on a still-registered identifier tears the previous
        // session down first, keeping the one-session-per-id invariant.
        if self.registry.read().await.contains(conn_id) {
            self.handle_disconnect(conn_id).await;
        }

        let profile = match self.store.load_or_create(&name, &sprite, &self.grid).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!("failed to resolve profile for {name}: {err}");
                self.send_to(
                    conn_id,
                    ServerEvent::Error {
                        message: "profile unavailable".to_string(),
                    },
                );
                return;
            }
        };

        let needs_starter = profile.progress.starter_chosen.is_none();
        let session = LiveSession::new(conn_id, profile);
        let profile_doc = session.profile.clone();

        let (own_view, players) = {
            let mut registry = self.registry.write().await;
            registry.insert(session);
            let players = registry.public_players();
            (players.get(&conn_id).cloned(), players)
        };

        self.send_to(
            conn_id,
            ServerEvent::State {
                grid: self.grid.rows().clone(),
                player: own_view,
                players: players.clone(),
                profile: profile_doc,
            },
        );
        if needs_starter {
            self.send_to(
                conn_id,
                ServerEvent::ChooseStarter {
                    options: STARTER_SPECIES.iter().map(|s| s.to_string()).collect(),
                },
            );
        }
        self.broadcast(ServerEvent::PlayersUpdate { players });

        self.autosave
            .start(conn_id, Arc::clone(&self.registry), self.store.clone());
        info!("connection {conn_id} joined as {name}");
    }

    async fn handle_move(&mut self, conn_id: u32, direction: Option<String>) {
        // Unrecognized or missing direction is a zero delta, not an error.
        let (dx, dy) = direction
            .as_deref()
            .and_then(Direction::parse)
            .map(Direction::delta)
            .unwrap_or((0, 0));

        let players = {
            let mut registry = self.registry.write().await;
            let Some(session) = registry.get_mut(conn_id) else {
                return;
            };
            if session.profile.progress.starter_chosen.is_none() {
                return;
            }

            let (next_x, next_y) = self.grid.clamp(session.x + dx, session.y + dy);
            if !self.grid.is_walkable(next_x, next_y) {
                return;
            }
            if next_x == session.x && next_y == session.y {
                // Edge clamp or zero delta: nothing changed, no broadcast.
                return;
            }

            session.x = next_x;
            session.y = next_y;
            registry.public_players()
        };

        self.broadcast(ServerEvent::PlayersUpdate { players });
    }

    async fn handle_choose_starter(&mut self, conn_id: u32, species: Option<String>) {
        // No session, no feedback: validation errors are only owed to a
        // connection that actually has one.
        if !self.registry.read().await.contains(conn_id) {
            return;
        }

        let Some(species) = species else {
            self.send_to(
                conn_id,
                ServerEvent::StarterError {
                    message: "no starter selected".to_string(),
                },
            );
            return;
        };

        // Selections match the recognized set exactly; unlike profile-name
        // lookups they are not case-folded.
        if !STARTER_SPECIES.contains(&species.as_str()) {
            self.send_to(
                conn_id,
                ServerEvent::StarterError {
                    message: format!("unknown starter: {species}"),
                },
            );
            return;
        }

        let snapshot = {
            let mut registry = self.registry.write().await;
            let Some(session) = registry.get_mut(conn_id) else {
                return;
            };
            if session.profile.progress.starter_chosen.is_some() {
                self.send_to(
                    conn_id,
                    ServerEvent::StarterError {
                        message: "starter already chosen".to_string(),
                    },
                );
                return;
            }

            session.profile.progress.starter_chosen = Some(species.clone());
            session.profile.party = vec![starter_entry(&species)];
            session.sync_profile();
            (session.profile.clone(), registry.public_players())
        };

        let (profile, players) = snapshot;
        self.persist(conn_id, profile, "starter_chosen").await;
        self.send_to(conn_id, ServerEvent::StarterConfirmed { species });
        self.broadcast(ServerEvent::PlayersUpdate { players });
    }

    async fn handle_map_transition(&mut self, conn_id: u32, map_id: Option<String>) {
        let snapshot = {
            let mut registry = self.registry.write().await;
            let Some(session) = registry.get_mut(conn_id) else {
                return;
            };
            if let Some(map_id) = map_id {
                session.map_id = map_id;
            }
            session.sync_profile();
            session.profile.clone()
        };

        // A map boundary is a durability checkpoint: save now, not on the
        // next autosave tick.
        self.persist(conn_id, snapshot, "map_transition").await;
    }

    async fn handle_inventory_change(&mut self, conn_id: u32, inventory: Option<Value>) {
        let snapshot = {
            let mut registry = self.registry.write().await;
            let Some(session) = registry.get_mut(conn_id) else {
                return;
            };
            if let Some(Value::Array(items)) = inventory {
                session.profile.inventory = items;
            }
            session.sync_profile();
            session.profile.clone()
        };

        self.persist(conn_id, snapshot, "inventory_change").await;
    }

    async fn handle_battle_end(&mut self, conn_id: u32, profile_patch: Option<Value>) {
        let snapshot = {
            let mut registry = self.registry.write().await;
            let Some(session) = registry.get_mut(conn_id) else {
                return;
            };

            if let Some(patch) = &profile_patch {
                if !patch.is_object() {
                    self.send_to(
                        conn_id,
                        ServerEvent::Error {
                            message: "profile patch must be a mapping".to_string(),
                        },
                    );
                    return;
                }
                if let Err(err) = ProfileStore::merge_patch(&mut session.profile, patch) {
                    self.send_to(
                        conn_id,
                        ServerEvent::Error {
                            message: format!("rejected profile patch: {err}"),
                        },
                    );
                    return;
                }
            }

            // Live fields win over whatever the patch claimed about them.
            session.sync_profile();
            session.profile.clone()
        };

        self.persist(conn_id, snapshot, "battle_end").await;
    }

    pub async fn handle_disconnect(&mut self, conn_id: u32) {
        // Cancel the autosave task before the session leaves the registry so
        // no tick can act on a removed entry.
        self.autosave.stop(conn_id);

        let (removed, players) = {
            let mut registry = self.registry.write().await;
            let removed = registry.remove(conn_id);
            (removed, registry.public_players())
        };

        let Some(mut session) = removed else {
            return;
        };

        // Final save is best-effort; a failure never blocks the cleanup.
        session.sync_profile();
        self.persist(conn_id, session.profile, "disconnect").await;
        self.broadcast(ServerEvent::PlayersUpdate { players });
        info!("connection {conn_id} disconnected");
    }

    /// Synchronous save of a profile snapshot; failures are logged, never
    /// propagated.
    async fn persist(&self, conn_id: u32, mut profile: TrainerProfile, reason: &str) {
        match self.store.save(&mut profile).await {
            Ok(()) => info!(
                "saved profile {} for connection {conn_id} ({reason})",
                profile.trainer.id
            ),
            Err(err) => warn!("save for connection {conn_id} failed ({reason}): {err}"),
        }
    }

    fn send_to(&self, conn_id: u32, event: ServerEvent) {
        if self
            .outbound
            .send(Outbound::ToClient { conn_id, event })
            .is_err()
        {
            warn!("outbound channel closed, dropping event for connection {conn_id}");
        }
    }

    fn broadcast(&self, event: ServerEvent) {
        if self.outbound.send(Outbound::Broadcast { event }).is_err() {
            warn!("outbound channel closed, dropping broadcast");
        }
    }
}

fn starter_entry(species: &str) -> Value {
    json!({
        "species": species,
        "level": 5,
        "experience": 0,
    })
}
