use anyhow::Result;
use tracing::info;

use mcp_router::bootstrap::Launcher;
use mcp_router::infrastructure::logger::{self, LogConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logger::init(LogConfig::from_env());

    let launcher = Launcher::from_env()?;
    info!(
        "mcp-router {} binding {}",
        mcp_router::VERSION,
        launcher.config().bind
    );
    launcher.launch().await
}
