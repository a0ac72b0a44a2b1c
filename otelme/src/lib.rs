//! Low-friction sugar over [OpenTelemetry] tracing — pronounced *"Oh, tell me"*.
//!
//! This crate is an expression-level front-end for the [`opentelemetry`] API:
//! it lets application code attach attributes, events, and scoped spans to the
//! ambient trace with short inline expressions instead of explicit tracer
//! plumbing. It creates spans through whatever tracer provider the host
//! process has installed and performs no export, sampling, or propagation of
//! its own.
//!
//! Everything starts with [`tell()`], which names an operation and returns a
//! lightweight [`Tell`] receiver.
//!
//! # Scoped spans
//!
//! Use a receiver as a scope guard or wrap a closure to create a span that is
//! entered and exited around a block of work:
//!
//! ```
//! use otelme::tell;
//!
//! {
//!     let _scope = tell("update_user_record").enter();
//!     // everything here runs inside the `update_user_record` span
//! }
//!
//! let rows = tell("load_rows").in_scope(|| {
//!     // traced work that produces a value
//!     3
//! });
//! assert_eq!(rows, 3);
//! ```
//!
//! The span is closed on every exit path. If the body panics, the span is
//! ended with an error status and the panic keeps propagating unchanged.
//!
//! Functions can be decorated instead, naming the span after the function or
//! an explicit override:
//!
//! ```
//! #[otelme::tell]
//! fn refresh_cache() {
//!     // spans per invocation, named `refresh_cache`
//! }
//!
//! #[otelme::tell("authorize")]
//! fn check(user: &str) -> bool {
//!     !user.is_empty()
//! }
//! # refresh_cache();
//! # assert!(check("ada"));
//! ```
//!
//! # Telling the current span about values
//!
//! A receiver combined with a value records that value on the current span and
//! passes the value through, so the tracing call can sit inside a larger
//! expression without an extra statement:
//!
//! ```
//! use otelme::tell;
//!
//! let _scope = tell("signup").enter();
//!
//! // `|` binds loosely: the whole right-hand expression becomes the attribute
//! let six = tell("six") | 4 + 2;
//! assert_eq!(six, 6);
//!
//! // `+` binds tightly: record a snapshot, then keep computing with it
//! let friends = ["ada", "grace"];
//! let new_count = tell("friends") + friends.len() as i64 + 1;
//! assert_eq!(new_count, 3);
//!
//! // `*` splats a mapping into an event on the current span
//! let details = [("user_id", "123"), ("plan", "free")];
//! tell("user.signup") * details;
//!
//! // `>>` fans a mapping out into `signup.<key>` attributes instead
//! tell("signup") >> [("user_id", "123")];
//! ```
//!
//! The three attribute spellings `|`, `<<`, and `+` are deliberately
//! equivalent in effect and differ only in how much of the surrounding
//! expression they capture; see [`Tell`] for the details. With no span active
//! every binding is a silent no-op that still returns its operand, so
//! instrumented expressions keep working when tracing is disabled.
//!
//! # Async
//!
//! Thread-ambient state must not leak between tasks that share a thread, so
//! futures are scoped with the [`Told`] adapter instead of holding a guard
//! across `.await`:
//!
//! ```
//! use otelme::{tell, FutureTellExt};
//!
//! async fn fetch() -> u32 { 7 }
//!
//! let traced = fetch().told(tell("fetch"));
//! # drop(traced);
//! ```
//!
//! `#[otelme::tell]` on an `async fn` expands to exactly this wrapping.
//!
//! [OpenTelemetry]: https://opentelemetry.io/
//! [`opentelemetry`]: https://docs.rs/opentelemetry

use thiserror::Error;

#[macro_use]
mod internal_logging;

mod count;
mod ops;
mod scope;
mod tell;

#[cfg(feature = "futures")]
mod future_ext;

pub use ops::{ToEventAttributes, ToValue};
pub use scope::active_span;
pub use tell::{tell, Scope, Tell};

#[cfg(feature = "futures")]
pub use future_ext::{FutureTellExt, StreamTellExt, Told};

/// The `#[tell]` attribute: wraps a function so every invocation runs inside
/// a span named after the function, or after the explicit `#[tell("name")]`
/// override.
#[cfg(feature = "macros")]
pub use otelme_macros::tell;

/// Errors surfaced by receiver construction and explicit scope exits.
///
/// Everything else in this crate degrades silently: operating on an absent
/// span is a no-op, never a failure.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The naming call was given an empty name.
    #[error("tell name must be a non-empty string")]
    EmptyName,

    /// A scope was exited while it was not the innermost open scope on its
    /// thread, which means enter/exit calls in the surrounding code are out
    /// of order.
    #[error("scope `{name}` exited out of order")]
    ScopeMismatch {
        /// Name of the span whose scope was mismatched.
        name: String,
    },
}

#[cfg(feature = "internal-logs")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{error, warn};
}
