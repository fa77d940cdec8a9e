use std::error::Error;
use std::sync::Arc;

use dotenv::dotenv;
use gateway::cookie::VISITOR_COOKIE_MAX_AGE;
use gateway::handler::RevokeSessions;
use gateway::telemetry::init_tracing;
use gateway::{AppState, Party, router};
use oidc::{HttpProvider, MemorySessionStore, OidcConfig, ProviderClient};
use tokio::net::TcpListener;
use tracing::info;

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    init_tracing();

    let config = OidcConfig::from_env()?;
    let provider: Arc<dyn ProviderClient> = Arc::new(HttpProvider::new(config.http_timeout)?);
    let sessions = MemorySessionStore::with_idle_timeout(VISITOR_COOKIE_MAX_AGE.to_std()?);
    let party = Party::new(config, provider)?
        .with_backchannel_logout(RevokeSessions::new(sessions.clone()));

    let addr = std::env::var("GATEWAY_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(AppState::new(party, sessions))).await?;

    Ok(())
}
