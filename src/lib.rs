pub mod chat;
pub mod config;
pub mod constants;
pub mod countdown;
pub mod engine;
pub mod error;
pub mod question_bank;
pub mod ranking_store;
pub mod registry;
pub mod server_protocol;
pub mod server_utils;
pub mod session;
pub mod types;
