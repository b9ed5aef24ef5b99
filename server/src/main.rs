mod routes;
mod state;

use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
enum ServerError {
    #[error("invalid PORT: {0}")]
    InvalidPort(String),
    #[error("invalid BIND_ADDR: {0}")]
    InvalidBind(String),
    #[error("server io: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "5003".into());
    let port: u16 = port.parse().map_err(|_| ServerError::InvalidPort(port))?;
    let host = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".into());
    let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|_| ServerError::InvalidBind(host))?;

    let app = routes::app(state::AppState::new());
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, "pepper control server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
