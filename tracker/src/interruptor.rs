//! Ctrl-C handling for the long-running commands

use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
#[repr(transparent)]
pub struct Interruptor(Arc<AtomicBool>);

impl Interruptor {
    pub fn new() -> Self {
        Interruptor(Arc::new(AtomicBool::new(false)))
    }

    /// First Ctrl-C sets the flag, a second one exits immediately
    pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
        let intr = self.clone();
        ctrlc::set_handler(move || {
            if intr.is_set() {
                let exit_code = if cfg!(target_family = "unix") {
                    // 128 + SIGINT
                    130
                } else {
                    // STATUS_CONTROL_C_EXIT
                    -1073741510
                };
                std::process::exit(exit_code);
            } else {
                intr.set();
            }
        })
    }

    pub fn set(&self) {
        self.0.store(true, SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(SeqCst)
    }

    /// Sleep for `d`, waking early when interrupted. Returns true if interrupted.
    pub async fn sleep(&self, d: Duration) -> bool {
        let until = Instant::now() + d;
        while !self.is_set() {
            let now = Instant::now();
            if now >= until {
                return false;
            }
            tokio::time::sleep((until - now).min(POLL_INTERVAL)).await;
        }
        true
    }
}

impl Default for Interruptor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_runs_out() {
        let intr = Interruptor::new();
        assert!(!intr.sleep(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn sleep_wakes_when_set() {
        let intr = Interruptor::new();
        let setter = intr.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            setter.set();
        });
        let started = Instant::now();
        assert!(intr.sleep(Duration::from_secs(30)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
