//! Thread-ambient tracking of open spans.
//!
//! Each thread owns a stack of the scopes currently open on it; the top of
//! the stack is what "the current span" means everywhere else in this crate.
//! Scopes are addressed by their position in the stack, which allows out of
//! order exits to be detected and reported instead of silently corrupting
//! the nesting. Only when the top of the stack is popped is the previous
//! scope actually restored.
//!
//! The stack relies on the fact that it is thread local and that the guards
//! constructed from its positions can't be moved to other threads, so a
//! position handed out here is always in bounds when it comes back.
//!
//! Span creation and closing are delegated entirely to the `opentelemetry`
//! SDK installed by the host process.

use std::borrow::Cow;
use std::cell::RefCell;
use std::sync::OnceLock;

use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::trace::{SpanRef, TraceContextExt, Tracer};
use opentelemetry::{Context, InstrumentationScope};

thread_local! {
    static SCOPES: RefCell<ScopeStack> = RefCell::new(ScopeStack::default());
}

/// Status description recorded on a span whose scope body unwound.
pub(crate) const PANIC_DESCRIPTION: &str = "scope body panicked";

fn tracer() -> BoxedTracer {
    static SCOPE: OnceLock<InstrumentationScope> = OnceLock::new();
    let scope = SCOPE.get_or_init(|| {
        InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
            .with_version(env!("CARGO_PKG_VERSION"))
            .build()
    });
    global::tracer_with_scope(scope.clone())
}

/// Returns the context of the innermost open scope on this thread, falling
/// back to the process-ambient [`Context::current`] when no scope is open.
///
/// The fallback keeps the receiver composable with hosts that attach
/// contexts through `opentelemetry` directly, e.g. extracted remote parents.
pub(crate) fn current_context() -> Context {
    SCOPES
        .with(|scopes| scopes.borrow().current())
        .unwrap_or_else(Context::current)
}

/// Runs a closure with a reference to this thread's current span.
///
/// With no span active the closure receives the no-op span, on which every
/// operation silently does nothing.
///
/// # Examples
///
/// ```
/// use opentelemetry::KeyValue;
///
/// otelme::tell("checkout").in_scope(|| {
///     otelme::active_span(|span| {
///         span.add_event("cart validated", vec![KeyValue::new("items", 3)]);
///     });
/// });
/// ```
pub fn active_span<F, R>(f: F) -> R
where
    F: FnOnce(SpanRef<'_>) -> R,
{
    f(current_context().span())
}

/// Starts a new span named `name`, parented to the current context, and
/// returns the context carrying it. The caller owns ending the span.
pub(crate) fn new_scope_context(name: Cow<'static, str>) -> Context {
    let parent = current_context();
    let span = tracer().start_with_context(name, &parent);
    parent.with_span(span)
}

/// Starts a new span and pushes its context as the innermost scope of this
/// thread. Never fails; when the stack is exhausted the returned id is inert
/// and the span simply never becomes current.
pub(crate) fn push_span(name: Cow<'static, str>) -> (ScopeId, Context) {
    let cx = new_scope_context(name);
    let id = SCOPES.with(|scopes| scopes.borrow_mut().push(cx.clone()));
    (ScopeId(id), cx)
}

/// Removes the scope at `id` from this thread's stack.
///
/// The caller decides what to do with the outcome: the RAII paths log
/// mismatches, the explicit exit path turns them into errors.
pub(crate) fn pop(id: ScopeId) -> Popped {
    if id.0 == ScopeStack::BASE_POS || id.0 == ScopeStack::MAX_POS {
        return Popped::Inert;
    }
    SCOPES.with(|scopes| scopes.borrow_mut().pop_id(id.0))
}

/// Re-attaches an existing scope context as the innermost scope, for the
/// duration of one poll of a [`Told`](crate::Told) adapter.
#[cfg(feature = "futures")]
pub(crate) fn attach(cx: Context) -> Frame {
    Frame {
        id: SCOPES.with(|scopes| scopes.borrow_mut().push(cx)),
    }
}

/// Outcome of removing a scope from the stack.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Popped {
    /// The scope was the innermost one; the previous scope is current again.
    Top,
    /// The scope was still open but not innermost. Its slot is cleared so it
    /// will not be restored later, and the innermost scope stays current.
    OutOfOrder,
    /// The position does not correspond to an open scope.
    NotFound,
    /// The id was a sentinel that never corresponded to a stack entry.
    Inert,
}

/// Guard for a scope frame attached around a single poll.
#[cfg(feature = "futures")]
pub(crate) struct Frame {
    id: u16,
}

#[cfg(feature = "futures")]
impl Drop for Frame {
    fn drop(&mut self) {
        if self.id == ScopeStack::BASE_POS || self.id == ScopeStack::MAX_POS {
            return;
        }
        let popped = SCOPES.with(|scopes| scopes.borrow_mut().pop_id(self.id));
        if popped != Popped::Top {
            // A frame outlived by a deeper entry means a sync guard was held
            // across an await point inside the polled future.
            otelme_warn!(name: "Frame.OutOfOrderDetach", position = self.id);
        }
    }
}

/// Position of an open scope in its thread's stack.
#[derive(Debug)]
pub(crate) struct ScopeId(u16);

/// Stack of the scopes open on one thread.
///
/// `current` is the context of the innermost scope and `prior[i]` remembers
/// what was current before the scope at position `i + 1` was pushed, with
/// `None` marking slots cleared by out of order exits.
struct ScopeStack {
    current: Context,
    prior: Vec<Option<Context>>,
}

impl ScopeStack {
    const BASE_POS: u16 = 0;
    const MAX_POS: u16 = u16::MAX;
    const INITIAL_CAPACITY: usize = 8;

    fn current(&self) -> Option<Context> {
        if self.prior.is_empty() {
            None
        } else {
            Some(self.current.clone())
        }
    }

    fn push(&mut self, cx: Context) -> u16 {
        // Positions are 1-based: the hypothetical position 0 is the base
        // state with no scope open.
        let next_id = self.prior.len() + 1;
        if next_id >= ScopeStack::MAX_POS.into() {
            otelme_warn!(
                name: "ScopeStack.LimitReached",
                message = format!(
                    "Too many open scopes on one thread. Max is {}. \
                     The current span is unchanged and the new scope never becomes current.",
                    ScopeStack::MAX_POS
                )
            );
            return ScopeStack::MAX_POS;
        }
        let previous = std::mem::replace(&mut self.current, cx);
        self.prior.push(Some(previous));
        next_id as u16
    }

    fn pop_id(&mut self, pos: u16) -> Popped {
        let len = self.prior.len() as u16;
        if pos == len && len > 0 {
            // Clear out any slots already emptied by out of order exits.
            while let Some(None) = self.prior.last() {
                let _ = self.prior.pop();
            }
            if let Some(Some(previous)) = self.prior.pop() {
                self.current = previous;
            }
            Popped::Top
        } else if pos < len {
            match self.prior.get_mut(pos as usize).map(Option::take) {
                Some(Some(_)) => Popped::OutOfOrder,
                _ => Popped::NotFound,
            }
        } else {
            Popped::NotFound
        }
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        ScopeStack {
            current: Context::new(),
            prior: Vec::with_capacity(ScopeStack::INITIAL_CAPACITY),
        }
    }
}
