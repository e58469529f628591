use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, Ordering::*},
    };

/**
    state owned by an interrupt handler, only entered by trying, never waited for

    a second entry while the first one is running, from a nested interrupt or another context, is refused instead of deadlocking
*/
pub struct HandlerCell<T> {
    value: UnsafeCell<T>,
    busy: AtomicBool,
}
// SAFETY: the value is only reachable by the one context that took the busy flag
unsafe impl<T: Send> Sync for HandlerCell<T> {}

impl<T> HandlerCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            busy: AtomicBool::new(false),
        }
    }

    /// run `task` on the value, none if another context is already in it
    pub fn try_with<R>(&self, task: impl FnOnce(&mut T) -> R) -> Option<R> {
        if ! self.enter()
            {return None}
        // SAFETY: the flag is ours until released below
        let result = task(unsafe {&mut *self.value.get()});
        self.busy.store(false, Release);
        Some(result)
    }

    /// take the busy flag, false if it was already taken
    #[cfg(target_has_atomic = "8")]
    fn enter(&self) -> bool {
        ! self.busy.swap(true, Acquire)
    }
    /// take the busy flag, false if it was already taken
    ///
    /// cores without read-modify-write atomics are single core, the only other context is an interrupt preempting this one, and it releases the flag before returning
    #[cfg(not(target_has_atomic = "8"))]
    fn enter(&self) -> bool {
        if self.busy.load(Acquire)
            {return false}
        self.busy.store(true, Relaxed);
        core::sync::atomic::compiler_fence(SeqCst);
        true
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_entry_refused() {
        let cell = HandlerCell::new(1);
        let nested = cell.try_with(|value| {
            *value += 1;
            cell.try_with(|value| *value += 10)
        });
        assert_eq!(nested, Some(None));
        assert_eq!(cell.try_with(|value| *value), Some(2));
    }
}
