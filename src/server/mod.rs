// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod connection_loop;
mod context;
mod initialization;
mod spawner;

/// The main proxy startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Initialize shared state, load the first slot map, bind the listener.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn the background tasks.
    spawner::spawn_all(&mut server_context);

    // 3. Start the accept loop. This runs until shutdown.
    connection_loop::run(server_context).await;

    Ok(())
}
