//! Keeps SIGINT/SIGTERM from killing the runner while a session is open.
//!
//! The child process still receives the terminal's signal and exits on its
//! own. The runner raises a flag the orchestrator polls, so provisioning
//! stops early and teardown gets to run.

use anyhow::{Context, Result};
use signal_hook::SigId;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct InterruptGuard {
    flag: Arc<AtomicBool>,
    ids: Vec<SigId>,
}

impl InterruptGuard {
    pub fn install() -> Result<Self> {
        let flag = Arc::new(AtomicBool::new(false));
        let mut guard = Self {
            flag,
            ids: Vec::with_capacity(2),
        };

        for signal in [SIGINT, SIGTERM] {
            let id = signal_hook::flag::register(signal, Arc::clone(&guard.flag))
                .with_context(|| format!("installing handler for signal {signal}"))?;
            guard.ids.push(id);
        }

        Ok(guard)
    }

    /// Shared flag raised by the first SIGINT or SIGTERM
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    pub fn interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}
