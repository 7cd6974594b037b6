use std::path::PathBuf;

use clap::Parser;

use crate::constants::{DEFAULT_LEAD_IN_SECONDS, DEFAULT_OUTBOUND_QUEUE, TICK_INTERVAL};
use crate::engine::TestEngineOptions;

#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "Multi-participant timed quiz server")]
pub struct ServerConfig {
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,
    #[arg(long, env = "QUESTIONS_DIR", default_value = "questions")]
    pub questions_dir: PathBuf,
    #[arg(long, env = "LEAD_IN_SECONDS", default_value_t = DEFAULT_LEAD_IN_SECONDS)]
    pub lead_in_seconds: u64,
    #[arg(long, env = "OUTBOUND_QUEUE", default_value_t = DEFAULT_OUTBOUND_QUEUE)]
    pub outbound_queue: usize,
}

impl ServerConfig {
    pub fn engine_options(&self) -> TestEngineOptions {
        TestEngineOptions {
            lead_in_seconds: self.lead_in_seconds,
            tick_interval: TICK_INTERVAL,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}
