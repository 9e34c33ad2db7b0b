//! Integration tests for the session server.
//!
//! These tests drive the engine through its public command surface the same
//! way the transport does, and check the observable effects: outbound
//! events, registry state, and profile documents on disk.

use serde_json::json;
use server::autosave::AutosaveScheduler;
use server::engine::{Engine, EngineCommand, Outbound};
use server::store::ProfileStore;
use server::world::WorldGrid;
use shared::{ClientEvent, Position, PublicPlayer, ServerEvent, Tile};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn land_grid(width: usize, height: usize) -> WorldGrid {
    WorldGrid::from_tiles(vec![vec![Tile::Land; width]; height])
}

fn harness(
    grid: WorldGrid,
    dir: &TempDir,
    autosave: Duration,
) -> (Engine, mpsc::UnboundedReceiver<Outbound>, ProfileStore) {
    let store = ProfileStore::new(dir.path());
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let engine = Engine::new(
        Arc::new(grid),
        store.clone(),
        AutosaveScheduler::new(autosave),
        outbound_tx,
    );
    (engine, outbound_rx, store)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

async fn send(engine: &mut Engine, conn_id: u32, event: ClientEvent) {
    engine
        .handle_command(EngineCommand::Event { conn_id, event })
        .await;
}

async fn seed_ready_profile(
    store: &ProfileStore,
    grid: &WorldGrid,
    name: &str,
    x: i32,
    y: i32,
) {
    let mut profile = store.create_default(name, "male_1.png", grid);
    profile.trainer.position = Position { x, y };
    profile.progress.starter_chosen = Some("charmander".to_string());
    store.save(&mut profile).await.unwrap();
}

fn broadcasts(messages: &[Outbound]) -> Vec<&HashMap<u32, PublicPlayer>> {
    messages
        .iter()
        .filter_map(|message| match message {
            Outbound::Broadcast {
                event: ServerEvent::PlayersUpdate { players },
            } => Some(players),
            _ => None,
        })
        .collect()
}

/// SESSION LIFECYCLE TESTS
mod session_lifecycle_tests {
    use super::*;

    /// A returning player connects, walks, hits water, and disconnects; the
    /// profile on disk reflects the last valid position.
    #[tokio::test]
    async fn returning_player_full_session() {
        let dir = TempDir::new().unwrap();
        let mut tiles = vec![vec![Tile::Land; 10]; 10];
        tiles[5][7] = Tile::Water;
        let grid = WorldGrid::from_tiles(tiles.clone());
        let (mut engine, mut rx, store) = harness(grid, &dir, Duration::from_secs(45));
        seed_ready_profile(&store, &WorldGrid::from_tiles(tiles), "Ash", 5, 5).await;

        send(
            &mut engine,
            1,
            ClientEvent::Connect {
                name: Some("Ash".to_string()),
                sprite: None,
            },
        )
        .await;

        let messages = drain(&mut rx);
        // Onboarding already done: state, then the join broadcast, no prompt.
        assert!(matches!(
            &messages[0],
            Outbound::ToClient { conn_id: 1, event: ServerEvent::State { .. } }
        ));
        assert!(!messages.iter().any(|message| matches!(
            message,
            Outbound::ToClient { event: ServerEvent::ChooseStarter { .. }, .. }
        )));
        let joined = broadcasts(&messages);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].get(&1).unwrap().x, 5);

        // One step east onto land.
        send(
            &mut engine,
            1,
            ClientEvent::Move {
                direction: Some("right".to_string()),
            },
        )
        .await;
        let messages = drain(&mut rx);
        assert_eq!(broadcasts(&messages)[0].get(&1).unwrap().x, 6);

        // Next step east is water: rejected silently, no broadcast.
        send(
            &mut engine,
            1,
            ClientEvent::Move {
                direction: Some("right".to_string()),
            },
        )
        .await;
        assert!(drain(&mut rx).is_empty());

        send(&mut engine, 1, ClientEvent::Disconnect).await;
        let messages = drain(&mut rx);
        let after = broadcasts(&messages);
        assert_eq!(after.len(), 1);
        assert!(after[0].is_empty());
        assert!(engine.registry().read().await.is_empty());

        let saved = store.find_by_name("Ash").await.unwrap().unwrap();
        assert_eq!(saved.trainer.position, Position { x: 6, y: 5 });
    }

    /// A first-time connect creates a profile on disk and prompts for a
    /// starter before any movement is allowed.
    #[tokio::test]
    async fn first_connect_creates_profile_and_prompts() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mut rx, store) = harness(land_grid(10, 10), &dir, Duration::from_secs(45));

        send(
            &mut engine,
            1,
            ClientEvent::Connect {
                name: Some("Brock".to_string()),
                sprite: Some("male_2.png".to_string()),
            },
        )
        .await;

        let messages = drain(&mut rx);
        let state_profile = messages
            .iter()
            .find_map(|message| match message {
                Outbound::ToClient {
                    conn_id: 1,
                    event: ServerEvent::State { profile, grid, .. },
                } => {
                    assert_eq!(grid.len(), 10);
                    Some(profile.clone())
                }
                _ => None,
            })
            .unwrap();
        assert!(messages.iter().any(|message| matches!(
            message,
            Outbound::ToClient { conn_id: 1, event: ServerEvent::ChooseStarter { options } }
                if options.len() == 3
        )));

        // The document on disk is the one the client was shown.
        let saved = store.find_by_name("Brock").await.unwrap().unwrap();
        assert_eq!(saved, state_profile);
        assert_eq!(saved.trainer.sprite, "male_2.png");
        assert_eq!(saved.trainer.money, 3000);
        assert!(saved.progress.starter_chosen.is_none());

        // Gated until the starter is picked.
        send(
            &mut engine,
            1,
            ClientEvent::Move {
                direction: Some("down".to_string()),
            },
        )
        .await;
        assert!(drain(&mut rx).is_empty());

        send(
            &mut engine,
            1,
            ClientEvent::ChooseStarter {
                species: Some("squirtle".to_string()),
            },
        )
        .await;
        let messages = drain(&mut rx);
        assert!(messages.iter().any(|message| matches!(
            message,
            Outbound::ToClient { conn_id: 1, event: ServerEvent::StarterConfirmed { species } }
                if species == "squirtle"
        )));

        let saved = store.find_by_name("Brock").await.unwrap().unwrap();
        assert_eq!(saved.progress.starter_chosen.as_deref(), Some("squirtle"));
        assert_eq!(saved.party.len(), 1);
    }

    /// A move clamped at the grid edge resolves to the current tile and
    /// must not produce a broadcast.
    #[tokio::test]
    async fn edge_clamped_move_never_broadcasts() {
        let dir = TempDir::new().unwrap();
        let grid = land_grid(10, 10);
        let (mut engine, mut rx, store) = harness(grid, &dir, Duration::from_secs(45));
        seed_ready_profile(&store, &land_grid(10, 10), "Ash", 0, 0).await;

        send(
            &mut engine,
            1,
            ClientEvent::Connect {
                name: Some("Ash".to_string()),
                sprite: None,
            },
        )
        .await;
        drain(&mut rx);

        for direction in ["left", "up"] {
            send(
                &mut engine,
                1,
                ClientEvent::Move {
                    direction: Some(direction.to_string()),
                },
            )
            .await;
        }
        assert!(drain(&mut rx).is_empty());

        let registry = engine.registry();
        let guard = registry.read().await;
        let session = guard.get(1).unwrap();
        assert_eq!((session.x, session.y), (0, 0));
        drop(guard);

        // The session is still live: an inward step broadcasts as usual.
        send(
            &mut engine,
            1,
            ClientEvent::Move {
                direction: Some("right".to_string()),
            },
        )
        .await;
        let messages = drain(&mut rx);
        assert_eq!(broadcasts(&messages)[0].get(&1).unwrap().x, 1);
    }

    /// Defaults apply when the connect event carries no fields at all.
    #[tokio::test]
    async fn anonymous_connect_uses_default_identity() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mut rx, store) = harness(land_grid(10, 10), &dir, Duration::from_secs(45));

        send(
            &mut engine,
            1,
            ClientEvent::Connect {
                name: None,
                sprite: None,
            },
        )
        .await;
        drain(&mut rx);

        let saved = store.find_by_name("William").await.unwrap().unwrap();
        assert_eq!(saved.trainer.sprite, "male_1.png");
        assert!(saved.trainer.id.starts_with("william-"));
    }
}

/// MULTI-SESSION TESTS
mod multi_session_tests {
    use super::*;

    #[tokio::test]
    async fn broadcasts_cover_every_live_session() {
        let dir = TempDir::new().unwrap();
        let grid = land_grid(10, 10);
        let (mut engine, mut rx, store) = harness(grid, &dir, Duration::from_secs(45));
        seed_ready_profile(&store, &land_grid(10, 10), "Ash", 2, 2).await;
        seed_ready_profile(&store, &land_grid(10, 10), "Misty", 8, 8).await;

        send(
            &mut engine,
            1,
            ClientEvent::Connect {
                name: Some("Ash".to_string()),
                sprite: None,
            },
        )
        .await;
        drain(&mut rx);

        send(
            &mut engine,
            2,
            ClientEvent::Connect {
                name: Some("Misty".to_string()),
                sprite: None,
            },
        )
        .await;
        let messages = drain(&mut rx);
        let joined = broadcasts(&messages);
        assert_eq!(joined[0].len(), 2);
        assert_eq!(joined[0].get(&1).unwrap().name, "Ash");
        assert_eq!(joined[0].get(&2).unwrap().name, "Misty");

        // One player moving shows up in the shared view; the other stays put.
        send(
            &mut engine,
            2,
            ClientEvent::Move {
                direction: Some("up".to_string()),
            },
        )
        .await;
        let messages = drain(&mut rx);
        let moved = broadcasts(&messages)[0];
        assert_eq!(moved.get(&2).unwrap().y, 7);
        assert_eq!(moved.get(&1).unwrap().x, 2);
    }

    /// Reconnecting with an already-live connection identifier replaces the
    /// old session instead of duplicating it.
    #[tokio::test]
    async fn reconnect_replaces_live_session() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mut rx, _) = harness(land_grid(10, 10), &dir, Duration::from_secs(45));

        send(
            &mut engine,
            1,
            ClientEvent::Connect {
                name: Some("Ash".to_string()),
                sprite: None,
            },
        )
        .await;
        send(
            &mut engine,
            1,
            ClientEvent::Connect {
                name: Some("Ash".to_string()),
                sprite: None,
            },
        )
        .await;
        drain(&mut rx);

        assert_eq!(engine.registry().read().await.len(), 1);
    }
}

/// PERSISTENCE AND SHUTDOWN TESTS
mod persistence_tests {
    use super::*;

    /// After a disconnect the autosave task must not resurrect the profile.
    #[tokio::test]
    async fn autosave_stops_with_the_session() {
        let dir = TempDir::new().unwrap();
        let grid = land_grid(10, 10);
        let (mut engine, mut rx, store) = harness(grid, &dir, Duration::from_millis(10));
        seed_ready_profile(&store, &land_grid(10, 10), "Ash", 5, 5).await;

        send(
            &mut engine,
            1,
            ClientEvent::Connect {
                name: Some("Ash".to_string()),
                sprite: None,
            },
        )
        .await;
        drain(&mut rx);

        tokio::time::sleep(Duration::from_millis(35)).await;

        send(&mut engine, 1, ClientEvent::Disconnect).await;
        drain(&mut rx);

        let saved = store.find_by_name("Ash").await.unwrap().unwrap();
        let path = store.save_path(&saved.trainer.id);
        std::fs::remove_file(&path).unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!path.exists());
    }

    /// Transport-level close behaves exactly like an explicit disconnect.
    #[tokio::test]
    async fn connection_closed_triggers_final_save() {
        let dir = TempDir::new().unwrap();
        let grid = land_grid(10, 10);
        let (mut engine, mut rx, store) = harness(grid, &dir, Duration::from_secs(45));
        seed_ready_profile(&store, &land_grid(10, 10), "Ash", 5, 5).await;

        send(
            &mut engine,
            1,
            ClientEvent::Connect {
                name: Some("Ash".to_string()),
                sprite: None,
            },
        )
        .await;
        send(
            &mut engine,
            1,
            ClientEvent::Move {
                direction: Some("down".to_string()),
            },
        )
        .await;
        drain(&mut rx);

        engine
            .handle_command(EngineCommand::ConnectionClosed { conn_id: 1 })
            .await;

        assert!(engine.registry().read().await.is_empty());
        let saved = store.find_by_name("Ash").await.unwrap().unwrap();
        assert_eq!(saved.trainer.position, Position { x: 5, y: 6 });
    }

    /// Storage that rejects writes must not block the connect handshake:
    /// the session registers and the state ack goes out with the profile
    /// held in memory.
    #[tokio::test]
    async fn connect_survives_unwritable_save_dir() {
        // /proc/sys is readable but rejects file creation, even for root.
        let store = ProfileStore::new("/proc/sys");
        let (outbound_tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = Engine::new(
            Arc::new(land_grid(10, 10)),
            store,
            AutosaveScheduler::new(Duration::from_secs(45)),
            outbound_tx,
        );

        send(
            &mut engine,
            1,
            ClientEvent::Connect {
                name: Some("Ash".to_string()),
                sprite: None,
            },
        )
        .await;

        let messages = drain(&mut rx);
        assert!(messages.iter().any(|message| matches!(
            message,
            Outbound::ToClient { conn_id: 1, event: ServerEvent::State { .. } }
        )));
        assert!(!messages.iter().any(|message| matches!(
            message,
            Outbound::ToClient { event: ServerEvent::Error { .. }, .. }
        )));
        assert!(engine.registry().read().await.contains(1));
    }

    /// A corrupt document in the save directory neither blocks a connect
    /// nor survives under its original name.
    #[tokio::test]
    async fn corrupt_save_is_quarantined_on_connect() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mut rx, store) = harness(land_grid(10, 10), &dir, Duration::from_secs(45));

        store.ensure_dir().await.unwrap();
        let corrupt = dir.path().join("mangled.json");
        std::fs::write(&corrupt, "{\"trainer\": [broken").unwrap();

        send(
            &mut engine,
            1,
            ClientEvent::Connect {
                name: Some("Ash".to_string()),
                sprite: None,
            },
        )
        .await;

        let messages = drain(&mut rx);
        assert!(messages.iter().any(|message| matches!(
            message,
            Outbound::ToClient { conn_id: 1, event: ServerEvent::State { .. } }
        )));
        assert!(!corrupt.exists());
        assert!(store.find_by_name("Ash").await.unwrap().is_some());
    }
}

/// WIRE FORMAT TESTS
mod wire_format_tests {
    use super::*;

    /// Events decoded from transport lines drive the engine exactly like
    /// constructed ones, and outbound events carry the tagged layout.
    #[tokio::test]
    async fn line_json_drives_the_engine() {
        let dir = TempDir::new().unwrap();
        let (mut engine, mut rx, _) = harness(land_grid(10, 10), &dir, Duration::from_secs(45));

        let lines = [
            json!({"event": "connect", "data": {"name": "Ash"}}).to_string(),
            json!({"event": "choose_starter", "data": {"species": "bulbasaur"}}).to_string(),
            json!({"event": "move", "data": {"direction": "down"}}).to_string(),
        ];
        for line in &lines {
            let event: ClientEvent = serde_json::from_str(line).unwrap();
            send(&mut engine, 1, event).await;
        }

        let messages = drain(&mut rx);
        let update = messages
            .iter()
            .rev()
            .find_map(|message| match message {
                Outbound::Broadcast { event: event @ ServerEvent::PlayersUpdate { .. } } => {
                    Some(event)
                }
                _ => None,
            })
            .unwrap();

        let encoded = serde_json::to_value(update).unwrap();
        assert_eq!(encoded["event"], "players_update");
        assert!(encoded["data"]["players"]["1"].is_object());
    }

    /// Sparse and unknown-field inbound payloads still decode.
    #[test]
    fn inbound_events_tolerate_sparse_payloads() {
        let bare: ClientEvent = serde_json::from_str(r#"{"event": "move", "data": {}}"#).unwrap();
        assert!(matches!(bare, ClientEvent::Move { direction: None }));

        let extra: ClientEvent =
            serde_json::from_str(r#"{"event": "move", "data": {"direction": "up", "speed": 9}}"#)
                .unwrap();
        assert!(matches!(extra, ClientEvent::Move { direction: Some(d) } if d == "up"));

        let disconnect: ClientEvent =
            serde_json::from_str(r#"{"event": "disconnect"}"#).unwrap();
        assert!(matches!(disconnect, ClientEvent::Disconnect));
    }
}
