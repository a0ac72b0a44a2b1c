//! The `tell` receiver: naming, scoping, and decoration.

use std::borrow::Cow;
use std::marker::PhantomData;

use opentelemetry::trace::{SpanRef, Status, TraceContextExt};
use opentelemetry::Context;

use crate::scope::{self, Popped, ScopeId};
use crate::{count, Error};

/// Names an operation and returns the receiver for it.
///
/// The receiver is cheap and ephemeral: construct one per expression or per
/// scope, right where it is used. Construction has no tracing side effect of
/// its own.
///
/// # Panics
///
/// Panics if `name` is empty. Use [`Tell::try_new`] to validate names coming
/// from data rather than from the source code.
///
/// # Examples
///
/// ```
/// use otelme::tell;
///
/// let traced_len = tell("payload_len") | "hello".len();
/// assert_eq!(traced_len, 5);
/// ```
pub fn tell(name: impl Into<Cow<'static, str>>) -> Tell {
    match Tell::try_new(name) {
        Ok(receiver) => receiver,
        Err(err) => panic!("{err}"),
    }
}

/// A named receiver for one tracing side effect.
///
/// Produced by [`tell`]. A receiver either scopes a span around some work
/// ([`enter`], [`in_scope`], the `#[tell]` attribute, or
/// [`told`](crate::FutureTellExt::told)) or combines with a value through an
/// operator; each form consumes the receiver, so a receiver that has opened a
/// scope can no longer appear in an operator expression.
///
/// # Operators
///
/// Every operator acts on the span that is current for the calling thread of
/// control and returns its right-hand operand unchanged, so the tracing call
/// can be embedded in a larger expression. With no current span the effect is
/// silently skipped and the operand still flows through.
///
/// | Expression | Effect on the current span |
/// |---|---|
/// | `tell("k") \| v` | set attribute `k = v` |
/// | `tell("k") << v` | set attribute `k = v` |
/// | `tell("k") + v` | set attribute `k = v` |
/// | `tell("k") * m` | record event `k` with `m`'s pairs as event attributes |
/// | `tell("k") >> m` | set one attribute `k.<key> = value` per pair of `m` |
///
/// The three attribute spellings are equivalent in effect; they differ only
/// in binding strength, so the call site chooses how much of the surrounding
/// expression is captured. `+` binds tighter than `<<`, which binds tighter
/// than `|`:
///
/// ```
/// use otelme::tell;
/// let _scope = tell("example").enter();
///
/// // records 9, evaluates to 7
/// assert_eq!(tell("nine") + 9 - 2, 7);
/// // records 7, evaluates to 7
/// assert_eq!(tell("seven") | 9 - 2, 7);
/// ```
///
/// [`enter`]: Tell::enter
/// [`in_scope`]: Tell::in_scope
#[derive(Clone, Debug)]
pub struct Tell {
    pub(crate) name: Cow<'static, str>,
}

impl Tell {
    /// Fallible form of [`tell`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyName`] when `name` is empty; names are never
    /// silently coerced.
    pub fn try_new(name: impl Into<Cow<'static, str>>) -> Result<Tell, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::EmptyName);
        }
        Ok(Tell { name })
    }

    /// The span name this receiver will tell about.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts a span named after this receiver, as a child of the current
    /// span, and makes it current until the returned guard is dropped.
    ///
    /// The guard closes the span on every exit path. When the scope unwinds,
    /// the span ends with an error status and the panic continues unchanged.
    ///
    /// The guard is thread-bound; in async code use
    /// [`told`](crate::FutureTellExt::told) or `#[otelme::tell]` instead of
    /// holding a guard across an await point.
    pub fn enter(self) -> Scope {
        let (id, cx) = scope::push_span(self.name.clone());
        Scope {
            id: Some(id),
            cx,
            name: self.name,
            _not_send: PhantomData,
        }
    }

    /// Runs `body` inside a span named after this receiver.
    ///
    /// This is the primitive behind every scoping form; [`enter`] and the
    /// `#[tell]` attribute are thin adapters over the same behavior.
    ///
    /// [`enter`]: Tell::enter
    pub fn in_scope<F, R>(self, body: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _scope = self.enter();
        body()
    }

    /// Adds `delta` to a running total kept per (span, name), records the new
    /// total as attribute `name` on the current span, and returns it.
    ///
    /// Totals live in a bounded, recently-used store, so counts for spans
    /// that stopped being touched are eventually evicted. With no current
    /// recording span this is a no-op that returns `delta`.
    ///
    /// # Examples
    ///
    /// ```
    /// use otelme::tell;
    /// let _scope = tell("import").enter();
    ///
    /// tell("rows").count(10);
    /// let _total = tell("rows").count(5);
    /// ```
    pub fn count(&self, delta: i64) -> i64 {
        count::record(&self.name, delta)
    }
}

/// A live scope: the state between entering and exiting a receiver.
///
/// Returned by [`Tell::enter`]. Dropping the guard pops the scope and ends
/// its span; [`exit`](Scope::exit) does the same but surfaces out-of-order
/// exits as an error instead of a diagnostic log line.
#[derive(Debug)]
pub struct Scope {
    id: Option<ScopeId>,
    cx: Context,
    name: Cow<'static, str>,
    // Scope ids are positions in a thread-local stack.
    _not_send: PhantomData<*const ()>,
}

impl Scope {
    /// A reference to this scope's span, for enrichment the operators do not
    /// cover (status, links, `record_error`).
    pub fn span(&self) -> SpanRef<'_> {
        self.cx.span()
    }

    /// The context carrying this scope's span, e.g. for handing to
    /// `opentelemetry` propagation APIs.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Ends the scope now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScopeMismatch`] when this scope is not the innermost
    /// open scope on the thread, which means enter/exit calls around it are
    /// out of order. The span is still ended.
    pub fn exit(mut self) -> Result<(), Error> {
        self.finish(false)
    }

    fn finish(&mut self, panicked: bool) -> Result<(), Error> {
        let Some(id) = self.id.take() else {
            return Ok(());
        };
        let popped = scope::pop(id);
        let span = self.cx.span();
        if panicked {
            span.set_status(Status::error(scope::PANIC_DESCRIPTION));
        }
        span.end();
        match popped {
            Popped::Top | Popped::Inert => Ok(()),
            Popped::OutOfOrder | Popped::NotFound => Err(Error::ScopeMismatch {
                name: self.name.to_string(),
            }),
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.id.is_none() {
            return;
        }
        let panicked = std::thread::panicking();
        if self.finish(panicked).is_err() {
            otelme_error!(name: "Scope.OutOfOrderExit", scope = self.name.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_names() {
        assert!(matches!(Tell::try_new(""), Err(Error::EmptyName)));
        assert!(matches!(Tell::try_new(String::new()), Err(Error::EmptyName)));
    }

    #[test]
    #[should_panic(expected = "non-empty")]
    fn naming_call_panics_on_empty_name() {
        let _ = tell("");
    }

    #[test]
    fn receiver_is_inert_until_used() {
        let receiver = tell("unused");
        assert_eq!(receiver.name(), "unused");
        drop(receiver);
    }

    #[test]
    fn in_scope_returns_the_body_value() {
        let value = tell("compute").in_scope(|| 41 + 1);
        assert_eq!(value, 42);
    }

    #[test]
    fn exit_in_order_is_ok() {
        let outer = tell("outer").enter();
        let inner = tell("inner").enter();
        assert!(inner.exit().is_ok());
        assert!(outer.exit().is_ok());
    }

    #[test]
    fn exit_out_of_order_is_surfaced() {
        let outer = tell("outer").enter();
        let inner = tell("inner").enter();
        match outer.exit() {
            Err(Error::ScopeMismatch { name }) => assert_eq!(name, "outer"),
            other => panic!("expected a scope mismatch, got {other:?}"),
        }
        assert!(inner.exit().is_ok());
    }
}
