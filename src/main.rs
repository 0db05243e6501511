use std::path::Path;

use suchat_server::{Server, ServerConfig, CONTROL_PANEL_PATH};
use tracing::info;

fn load_config() -> suchat_server::Result<ServerConfig> {
    match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(Path::new(&path)),
        None => Ok(ServerConfig::default()),
    }
}

fn main() -> suchat_server::Result<()> {
    // The configured level is not known yet, so loading logs at the default one.
    let config = tracing::subscriber::with_default(tracing_subscriber::fmt().finish(), load_config)?;

    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level())
        .init();
    info!("Loaded config: {:?}", config);

    let server = Server::new(config);
    server.start()?;
    if let Some(url) = server.url_for(CONTROL_PANEL_PATH) {
        info!("Control panel at {}", url);
    }

    server.wait();
    Ok(())
}
