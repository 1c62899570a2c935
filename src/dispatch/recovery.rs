//! Fault capture for the dispatcher's recovery boundary.
//!
//! A panic payload carries no stack, so a process-wide panic hook records a
//! backtrace into a thread-local slot whenever the panicking thread is inside a
//! [`Guarded`] poll. Unwinding ends in `catch_unwind` within that same poll, on
//! the same thread, where [`take_captured_stack`] drains the slot. Panics outside
//! a guarded poll go to the previously installed hook untouched.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context as TaskContext, Poll};

use crate::router::Fault;

/// What the dispatcher knows about a recovered fault. Attached to the context of
/// the 500 hop so the error page can show it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    /// Display form of the panic payload or returned error.
    pub fault: String,
    /// Bounded stack snapshot, one frame line per entry. Empty for returned errors,
    /// which carry their source chain here instead.
    pub stack: Vec<String>,
}

impl Diagnostics {
    /// Builds diagnostics from a caught panic payload and whatever the hook captured.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>, max_frames: usize) -> Self {
        let fault = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with a non-string payload".to_owned()
        };
        let mut stack = take_captured_stack().unwrap_or_default();
        stack.truncate(max_frames);
        Self { fault, stack }
    }

    /// Builds diagnostics from an error a handler or hook returned.
    pub(crate) fn from_fault(fault: &Fault, max_frames: usize) -> Self {
        let mut stack = Vec::new();
        let mut source = fault.source();
        while let Some(err) = source {
            if stack.len() >= max_frames {
                break;
            }
            stack.push(format!("caused by: {err}"));
            source = err.source();
        }
        Self {
            fault: fault.to_string(),
            stack,
        }
    }
}

thread_local! {
    static GUARDED: Cell<bool> = const { Cell::new(false) };
    static CAPTURED: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Installs the capturing panic hook once per process, chaining to the hook that
/// was active before.
pub(crate) fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if !GUARDED.with(Cell::get) {
                previous(info);
                return;
            }
            let mut frames = Vec::new();
            if let Some(location) = info.location() {
                frames.push(format!("panicked at {location}"));
            }
            frames.extend(
                Backtrace::force_capture()
                    .to_string()
                    .lines()
                    .map(|line| line.trim_end().to_owned()),
            );
            CAPTURED.with(|slot| *slot.borrow_mut() = Some(frames));
        }));
    });
}

fn take_captured_stack() -> Option<Vec<String>> {
    CAPTURED.with(|slot| slot.borrow_mut().take())
}

// Restores the previous guard state on drop, including while unwinding.
struct GuardFlag {
    previous: bool,
}

impl GuardFlag {
    fn raise() -> Self {
        let previous = GUARDED.with(|flag| flag.replace(true));
        Self { previous }
    }
}

impl Drop for GuardFlag {
    fn drop(&mut self) {
        GUARDED.with(|flag| flag.set(self.previous));
    }
}

/// Future wrapper that marks the current thread as inside the recovery boundary
/// for the duration of every poll.
pub(crate) struct Guarded<F: Future> {
    inner: Pin<Box<F>>,
}

impl<F: Future> Guarded<F> {
    pub(crate) fn new(inner: F) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl<F: Future> Future for Guarded<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let _flag = GuardFlag::raise();
        self.inner.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::panic::AssertUnwindSafe;

    #[derive(Debug, thiserror::Error)]
    #[error("outer")]
    struct Outer(#[source] Inner);

    #[derive(Debug, thiserror::Error)]
    #[error("inner")]
    struct Inner;

    #[tokio::test]
    async fn guarded_panic_captures_location_and_message() {
        install_panic_hook();
        let caught = AssertUnwindSafe(Guarded::new(async {
            panic!("boom in handler");
        }))
        .catch_unwind()
        .await;

        let payload = caught.unwrap_err();
        let diagnostics = Diagnostics::from_panic(payload, 64);
        assert_eq!(diagnostics.fault, "boom in handler");
        assert!(diagnostics.stack[0].starts_with("panicked at "));
        assert!(diagnostics.stack.len() <= 64);
    }

    #[tokio::test]
    async fn stack_is_truncated() {
        install_panic_hook();
        let caught = AssertUnwindSafe(Guarded::new(async {
            panic!("{}", String::from("formatted"));
        }))
        .catch_unwind()
        .await;

        let diagnostics = Diagnostics::from_panic(caught.unwrap_err(), 1);
        assert_eq!(diagnostics.fault, "formatted");
        assert_eq!(diagnostics.stack.len(), 1);
    }

    #[test]
    fn guard_flag_restores_previous_state() {
        assert!(!GUARDED.with(Cell::get));
        {
            let _outer = GuardFlag::raise();
            {
                let _inner = GuardFlag::raise();
                assert!(GUARDED.with(Cell::get));
            }
            assert!(GUARDED.with(Cell::get));
        }
        assert!(!GUARDED.with(Cell::get));
    }

    #[test]
    fn returned_error_lists_its_sources() {
        let fault: Fault = Box::new(Outer(Inner));
        let diagnostics = Diagnostics::from_fault(&fault, 8);
        assert_eq!(diagnostics.fault, "outer");
        assert_eq!(diagnostics.stack, vec!["caused by: inner".to_owned()]);
    }
}
