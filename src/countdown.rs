use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::registry::ConnectionRegistry;
use crate::server_protocol::ServerMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountdownOutcome {
    Expired,
    Finished,
    Cancelled,
}

#[derive(Debug)]
pub struct Countdown {
    interval: Duration,
    total: AtomicU64,
    elapsed: AtomicU64,
    paused: AtomicBool,
    run_token: CancellationToken,
    phase_token: Mutex<CancellationToken>,
}

impl Countdown {
    pub fn new(interval: Duration, run_token: CancellationToken) -> Self {
        let phase_token = run_token.child_token();
        Self {
            interval,
            total: AtomicU64::new(0),
            elapsed: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            run_token,
            phase_token: Mutex::new(phase_token),
        }
    }

    pub fn arm(&self, total_ticks: u64) {
        self.total.store(total_ticks, Ordering::SeqCst);
        self.elapsed.store(0, Ordering::SeqCst);
        let mut phase = self
            .phase_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *phase = self.run_token.child_token();
    }

    pub async fn run(&self, registry: &ConnectionRegistry) -> CountdownOutcome {
        let phase = self.current_phase();
        loop {
            if phase.is_cancelled() {
                return self.signal_outcome();
            }
            registry
                .broadcast(&ServerMessage::Tick(self.remaining().to_string()), &[])
                .await;

            tokio::select! {
                biased;
                _ = phase.cancelled() => return self.signal_outcome(),
                _ = tokio::time::sleep(self.interval) => {}
            }

            if !self.is_paused() {
                self.elapsed.fetch_add(1, Ordering::SeqCst);
            }
            if self.elapsed.load(Ordering::SeqCst) >= self.total.load(Ordering::SeqCst) {
                return CountdownOutcome::Expired;
            }
        }
    }

    pub fn finish(&self) {
        self.current_phase().cancel();
    }

    pub fn extend(&self, ticks: u64) {
        self.total.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn set_paused(&self, paused: bool) -> bool {
        self.paused.swap(paused, Ordering::SeqCst) != paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> u64 {
        self.total
            .load(Ordering::SeqCst)
            .saturating_sub(self.elapsed.load(Ordering::SeqCst))
    }

    fn current_phase(&self) -> CancellationToken {
        self.phase_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn signal_outcome(&self) -> CountdownOutcome {
        if self.run_token.is_cancelled() {
            CountdownOutcome::Cancelled
        } else {
            CountdownOutcome::Finished
        }
    }
}
