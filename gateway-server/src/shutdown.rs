//! Draining flag consulted by the shutdown-gate middleware (pipeline step
//! 3): once set, new requests get a 503 instead of being admitted, while
//! requests already past the gate run to completion.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct ShutdownGate {
    draining: AtomicBool,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_accepting_requests() {
        assert!(!ShutdownGate::new().is_draining());
    }

    #[test]
    fn begin_draining_flips_the_flag() {
        let gate = ShutdownGate::new();
        gate.begin_draining();
        assert!(gate.is_draining());
    }
}
