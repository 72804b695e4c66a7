use anyhow::Result;
use std::sync::Arc;

use sheet_query::{config::Config, logging, routes};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging()?;

    let config = Config::from_env()?;
    let addr = config.addr;

    let state = Arc::new(routes::AppState::new(config));
    let app = routes::app(state);

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
