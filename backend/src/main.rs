use backend::{app, AppState};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let jwt_secret =
        env::var("KONAN_JWT_SECRET").unwrap_or_else(|_| "change-me".to_string());
    let state = if let Ok(path) = env::var("KONAN_STATE_PATH") {
        AppState::with_persistence(path, jwt_secret).await
    } else {
        AppState::new(jwt_secret)
    };

    let addr = env::var("KONAN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    tracing::info!("listening on {addr}");
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app(state)).await?;

    Ok(())
}
