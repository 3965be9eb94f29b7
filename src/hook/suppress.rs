//! Re-entrancy suppression.
//!
//! Calling the original body of an intercepted function means calling the function itself:
//! its prologue runs and enters the dispatcher again. The caller arms a thread-local flag
//! first; the next dispatch on the same thread consumes it and falls through into the
//! original body.

use std::cell::Cell;

thread_local! {
    static SUPPRESS_NEXT: Cell<bool> = const { Cell::new(false) };
}

/// Clears the flag and returns whether it was set.
pub(crate) fn consume() -> bool {
    SUPPRESS_NEXT.with(|flag| flag.replace(false))
}

/// True if the next dispatch on this thread will fall through.
#[must_use]
pub fn is_armed() -> bool {
    SUPPRESS_NEXT.with(Cell::get)
}

/// Scoped arming of the suppression flag.
///
/// The flag is set on creation and cleared on drop, so it never leaks into a later
/// dispatch even when the protected call fails before reaching the dispatcher.
pub struct SuppressionGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl SuppressionGuard {
    /// Arms the flag for the current thread.
    #[must_use]
    pub fn arm() -> Self {
        SUPPRESS_NEXT.with(|flag| flag.set(true));
        SuppressionGuard {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        SUPPRESS_NEXT.with(|flag| flag.set(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_is_single_shot() {
        let guard = SuppressionGuard::arm();
        assert!(is_armed());
        assert!(consume());
        assert!(!consume());
        drop(guard);
        assert!(!is_armed());
    }

    #[test]
    fn guard_clears_unconsumed_flag() {
        {
            let _guard = SuppressionGuard::arm();
            assert!(is_armed());
        }
        assert!(!is_armed());
        assert!(!consume());
    }

    #[test]
    fn flag_is_thread_local() {
        let _guard = SuppressionGuard::arm();
        let other = std::thread::spawn(is_armed).join().unwrap();
        assert!(!other);
        assert!(is_armed());
        assert!(consume());
    }
}
