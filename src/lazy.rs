//! The "lazy value" utility.
//!
//! Three flavors of a deferred value, as distinct small types rather than
//! one configurable struct, since their concurrency contracts differ enough
//! that sharing an implementation would just hide which one a call site got:
//!
//! - [`Opportunistic`]: racy init, at-most-once publish. Multiple threads
//!   may run the initializer concurrently; only one result is kept.
//! - [`Pessimistic`]: mutex-guarded init, computed (and memoized, including
//!   the error case) exactly once.
//! - [`AutoReset`]: wraps a `Pessimistic`-shaped cell and clears it once a
//!   period elapses, via a compare-and-swap on the last-reset timestamp so
//!   concurrent readers produce at most one reset per interval.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::Duration as StdDuration;

/// Racy init, at-most-once publish — a thin, documented wrapper over
/// [`std::sync::OnceLock`].
pub struct Opportunistic<T> {
    inner: OnceLock<T>,
}

impl<T> Default for Opportunistic<T> {
    fn default() -> Self {
        Opportunistic { inner: OnceLock::new() }
    }
}

impl<T> Opportunistic<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_init(&self, f: impl FnOnce() -> T) -> &T {
        self.inner.get_or_init(f)
    }

    pub fn get(&self) -> Option<&T> {
        self.inner.get()
    }
}

/// Mutex-guarded init with exception memoization: the first call to
/// `get_or_try_init` computes and stores the result (`Ok` or `Err`);
/// every later call returns the memoized value without recomputing.
pub struct Pessimistic<T, E> {
    state: Mutex<Option<Result<T, E>>>,
}

impl<T, E> Default for Pessimistic<T, E> {
    fn default() -> Self {
        Pessimistic { state: Mutex::new(None) }
    }
}

impl<T: Clone, E: Clone> Pessimistic<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_try_init(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let mut guard = self.state.lock();
        if let Some(v) = guard.as_ref() {
            return v.clone();
        }
        let v = f();
        *guard = Some(v.clone());
        v
    }

    pub fn reset(&self) {
        *self.state.lock() = None;
    }
}

/// Wraps a `Pessimistic`-shaped cell; resets it once `period` has elapsed
/// since the last reset. The CAS on `last_reset_epoch_ms` means only the
/// single caller that wins the race performs the reset; everyone else in
/// the same interval just reads the (possibly freshly reset) cell.
pub struct AutoReset<T, E> {
    period: StdDuration,
    last_reset_epoch_ms: AtomicI64,
    cell: Pessimistic<T, E>,
}

impl<T: Clone, E: Clone> AutoReset<T, E> {
    pub fn new(period: StdDuration) -> Self {
        AutoReset {
            period,
            last_reset_epoch_ms: AtomicI64::new(0),
            cell: Pessimistic::new(),
        }
    }

    /// `now_epoch_ms` is caller-supplied (rather than read internally) so
    /// tests can drive the clock deterministically.
    pub fn get_or_try_init(&self, now_epoch_ms: i64, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        self.maybe_reset(now_epoch_ms);
        self.cell.get_or_try_init(f)
    }

    fn maybe_reset(&self, now_epoch_ms: i64) {
        let last = self.last_reset_epoch_ms.load(Ordering::Acquire);
        if now_epoch_ms - last >= self.period.as_millis() as i64 {
            if self
                .last_reset_epoch_ms
                .compare_exchange(last, now_epoch_ms, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.cell.reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn opportunistic_publishes_once() {
        let lazy = Opportunistic::new();
        assert_eq!(*lazy.get_or_init(|| 1), 1);
        assert_eq!(*lazy.get_or_init(|| 2), 1);
    }

    #[test]
    fn pessimistic_memoizes_error_without_recomputing() {
        let calls = AtomicU32::new(0);
        let lazy: Pessimistic<i32, String> = Pessimistic::new();
        let first = lazy.get_or_try_init(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("boom".to_string())
        });
        let second = lazy.get_or_try_init(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        });
        assert_eq!(first, Err("boom".to_string()));
        assert_eq!(second, Err("boom".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn auto_reset_clears_cell_after_period_elapses() {
        let lazy: AutoReset<i32, String> = AutoReset::new(StdDuration::from_millis(100));
        let v1 = lazy.get_or_try_init(0, || Ok(1)).unwrap();
        let v2 = lazy.get_or_try_init(50, || Ok(2)).unwrap();
        assert_eq!((v1, v2), (1, 1)); // within period: memoized
        let v3 = lazy.get_or_try_init(200, || Ok(3)).unwrap();
        assert_eq!(v3, 3); // period elapsed: recomputed
    }

    #[test]
    fn auto_reset_cas_allows_only_one_resetter_per_interval() {
        let lazy = Arc::new(AutoReset::<i32, String>::new(StdDuration::from_millis(10)));
        let resets = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lazy = lazy.clone();
            let resets = resets.clone();
            handles.push(std::thread::spawn(move || {
                lazy.get_or_try_init(1000, || {
                    resets.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(1)
                })
                .unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }
}
