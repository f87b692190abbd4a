use core::{future::poll_fn, task::Poll};

use atomic::{Atomic, Ordering};
use embassy_sync::waitqueue::AtomicWaker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::NoUninit)]
#[repr(u8)]
enum LockState {
    Free,
    Held,
}

/// Non-blocking binary lock guarding one descriptor's single in-flight
/// transfer. Released from foreground or interrupt context.
pub struct BusyLock {
    state: Atomic<LockState>,
    waker: AtomicWaker,
}

impl BusyLock {
    pub const fn new() -> Self {
        Self {
            state: Atomic::new(LockState::Free),
            waker: AtomicWaker::new(),
        }
    }

    /// Returns `true` if this call took the lock.
    pub fn try_lock(&self) -> bool {
        self.state
            .compare_exchange(
                LockState::Free,
                LockState::Held,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn unlock(&self) {
        self.state.store(LockState::Free, Ordering::Release);
        self.waker.wake();
    }

    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Acquire) == LockState::Held
    }

    pub fn wait(&self) {
        while self.is_locked() {
            core::hint::spin_loop();
        }
    }

    pub async fn idle(&self) {
        poll_fn(|cx| {
            self.waker.register(cx.waker());
            if self.is_locked() {
                Poll::Pending
            } else {
                Poll::Ready(())
            }
        })
        .await
    }
}

impl Default for BusyLock {
    fn default() -> Self {
        Self::new()
    }
}
