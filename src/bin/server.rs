use std::sync::Arc;

use clap::Parser;
use quiz_challenge_server::config::ServerConfig;
use quiz_challenge_server::error::Result;
use quiz_challenge_server::question_bank::DirectoryQuestionBank;
use quiz_challenge_server::session::{router, ServerState};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .init();

    let config = ServerConfig::parse();
    tracing::info!(
        questions_dir = %config.questions_dir.display(),
        lead_in_seconds = config.lead_in_seconds,
        "starting quiz server"
    );

    let bank = Arc::new(DirectoryQuestionBank::new(&config.questions_dir));
    let state = Arc::new(ServerState::new(
        bank,
        config.engine_options(),
        config.outbound_queue,
    ));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!(port = config.port, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
