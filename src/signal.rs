//! Termination signals, latched for the checker to poll.

use std::sync::atomic::{AtomicI32, Ordering};

use log::{debug, warn};

/// Signals that stop a run
pub const TERMINATING: [libc::c_int; 4] = [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT];

/// Last signal received, zero when none
#[derive(Debug)]
pub struct Latch(AtomicI32);

impl Latch {
    pub const fn new() -> Self {
        Self(AtomicI32::new(0))
    }

    pub fn set(&self, signal: i32) {
        self.0.store(signal, Ordering::SeqCst);
    }

    pub fn get(&self) -> Option<i32> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            signal => Some(signal),
        }
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) static PENDING: Latch = Latch::new();

extern "C" fn latch(signal: libc::c_int) {
    PENDING.set(signal);
}

/// Catch the terminating signals that are not already ignored.
/// Blocking reads fail with `Interrupted` instead of restarting.
pub fn install() {
    let handler = latch as extern "C" fn(libc::c_int) as libc::sighandler_t;
    for signal in TERMINATING {
        // SAFETY: sigaction is plain data and both calls get valid pointers;
        // the handler only stores into an atomic
        unsafe {
            let mut previous: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signal, std::ptr::null(), &mut previous) != 0 {
                warn!("Can't query signal {signal}");
                continue;
            }
            if previous.sa_sigaction == libc::SIG_IGN {
                debug!("Signal {signal} stays ignored");
                continue;
            }
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handler;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                warn!("Can't catch signal {signal}");
            }
        }
    }
}

/// The signal received since start-up, if any
pub fn pending() -> Option<i32> {
    PENDING.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_keeps_the_last_signal() {
        let latch = Latch::new();
        assert_eq![latch.get(), None];
        latch.set(libc::SIGHUP);
        latch.set(libc::SIGTERM);
        assert_eq![latch.get(), Some(libc::SIGTERM)];
        latch.clear();
        assert_eq![latch.get(), None];
    }

    #[test]
    fn handlers_do_not_restart_reads() {
        install();
        assert_eq![pending(), None];
        let mut current: libc::sigaction = unsafe { std::mem::zeroed() };
        assert_eq![
            unsafe { libc::sigaction(libc::SIGTERM, std::ptr::null(), &mut current) },
            0
        ];
        if current.sa_sigaction != libc::SIG_IGN {
            assert_eq![
                current.sa_sigaction,
                latch as extern "C" fn(libc::c_int) as libc::sighandler_t
            ];
            assert_eq![current.sa_flags & libc::SA_RESTART, 0];
        }
    }
}
