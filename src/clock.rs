//! C1 — MonoClock & Stopwatches.
//!
//! A named, restartable elapsed-time handle built on `std::time::Instant`.
//! There is no global clock singleton: every owner (a `WClient`, `Aggie`)
//! holds the `Stopwatch` handles it needs directly, per the "no hidden
//! coupling" design note.

use std::time::{Duration, Instant};

/// A restartable "time since last event" handle.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started_at: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    /// Resets the handle so `elapsed()` starts counting from now.
    pub fn restart(&mut self) {
        self.started_at = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn restart_resets_elapsed() {
        let mut sw = Stopwatch::start();
        sleep(Duration::from_millis(20));
        let before_restart = sw.elapsed_ms();
        assert!(before_restart >= 20);
        sw.restart();
        assert!(sw.elapsed_ms() < before_restart);
    }
}
