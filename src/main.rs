use std::sync::{Arc, RwLock};

use tracing::info;

use rill::bot::engine::Engine;
use rill::config::{self, Config};
use rill::irc::client::ChatClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::from_env()?;

    let commands = match &config.commands_path {
        Some(path) => config::load_commands(path)?,
        None => Vec::new(),
    };
    info!(count = commands.len(), "loaded command list");
    let commands = Arc::new(RwLock::new(commands));

    info!(channel = %config.params.channel, "connecting to Twitch chat");
    let (client, events) = ChatClient::connect(config.params.clone())?;

    let engine = Engine::new(client.clone(), Arc::clone(&commands));
    let engine_task = tokio::spawn(engine.run(events));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    client.disconnect();
    engine_task.await?;

    Ok(())
}
