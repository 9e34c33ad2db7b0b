use anyhow::Result;
use clap::Parser;
use log::info;
use server::autosave::AutosaveScheduler;
use server::engine::{Engine, EngineCommand, Outbound};
use server::net::NetworkServer;
use server::store::ProfileStore;
use server::world::{TileWeights, WorldGrid};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Authoritative session server for the grid world")]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Directory for trainer profile saves
    #[clap(short, long, default_value = "data/saves")]
    data_dir: String,
    /// World grid width and height in tiles
    #[clap(short, long, default_value = "30")]
    grid_size: usize,
    /// Seconds between autosave flushes per session
    #[clap(short, long, default_value = "45")]
    autosave_secs: u64,
    /// Attempts before spawn search falls back to the origin
    #[clap(long, default_value = "500")]
    spawn_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut grid = WorldGrid::generate(args.grid_size, args.grid_size, &TileWeights::default());
    grid.carve_spawn_area(
        shared::DEFAULT_SPAWN.0,
        shared::DEFAULT_SPAWN.1,
        2,
    );
    let grid = Arc::new(grid);
    info!(
        "world ready: {}x{} grid, saves in {}",
        grid.width(),
        grid.height(),
        args.data_dir
    );

    let store = ProfileStore::new(&args.data_dir).with_spawn_attempts(args.spawn_attempts);
    store.ensure_dir().await?;

    let (command_tx, command_rx) = mpsc::unbounded_channel::<EngineCommand>();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Outbound>();

    let engine = Engine::new(
        Arc::clone(&grid),
        store,
        AutosaveScheduler::new(Duration::from_secs(args.autosave_secs)),
        outbound_tx,
    );

    let address = format!("{}:{}", args.host, args.port);
    let network = Arc::new(NetworkServer::new(&address));

    let accept_handle = {
        let network = Arc::clone(&network);
        tokio::spawn(async move { network.start(command_tx).await })
    };
    let outbound_handle = {
        let network = Arc::clone(&network);
        tokio::spawn(async move { network.run_outbound(outbound_rx).await })
    };
    let engine_handle = tokio::spawn(async move { engine.run(command_rx).await });

    tokio::select! {
        result = accept_handle => {
            if let Ok(Err(err)) = result {
                return Err(err);
            }
        }
        _ = outbound_handle => {}
        _ = engine_handle => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }

    Ok(())
}
