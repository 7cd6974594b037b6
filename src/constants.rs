use std::time::Duration;

pub const TICK_SECONDS: u64 = 1;
pub const TICK_INTERVAL: Duration = Duration::from_secs(TICK_SECONDS);

pub const DEFAULT_LEAD_IN_SECONDS: u64 = 10;
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

pub const MAX_NAME_LEN: usize = 24;
pub const MAX_QUESTION_COUNT: usize = 100;
pub const MIN_TIME_LIMIT_SECONDS: u64 = 5;
pub const MAX_TIME_LIMIT_SECONDS: u64 = 600;
pub const MAX_EXTENSION_SECONDS: u64 = 300;

pub const DEFAULT_RANKING_LIMIT: usize = 10;
pub const MAX_RANKING_LIMIT: usize = 100;

pub const CLOSE_NAME_IN_USE: u16 = 4001;
pub const CLOSE_PROTOCOL_ERROR: u16 = 4002;
