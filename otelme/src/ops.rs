//! Operator bindings: one tracing side effect per operator, value passed
//! through.
//!
//! The receiver deliberately overloads a handful of binary operators so a
//! tracing call can live inside an expression instead of next to it. All of
//! them read the current span through the scope tracker and degrade to
//! pass-through no-ops when nothing is active.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::ops::{Add, BitOr, Mul, Shl, Shr};

use opentelemetry::trace::TraceContextExt;
use opentelemetry::{KeyValue, StringValue, Value};

use crate::scope;
use crate::Tell;

/// Conversion into an attribute value, by reference so the original can keep
/// flowing through the surrounding expression.
///
/// Implemented for the scalar and string types `opentelemetry` attributes
/// support; integers widen to `i64` and `f32` widens to `f64`.
pub trait ToValue {
    /// The attribute value to record for `self`.
    fn to_value(&self) -> Value;
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

macro_rules! to_value_via_i64 {
    ($($t:ty),+ $(,)?) => {
        $(
            impl ToValue for $t {
                fn to_value(&self) -> Value {
                    Value::I64(*self as i64)
                }
            }
        )+
    };
}

to_value_via_i64!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl ToValue for f32 {
    fn to_value(&self) -> Value {
        Value::F64((*self).into())
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> Value {
        Value::F64(*self)
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::String(self.to_owned().into())
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone().into())
    }
}

impl ToValue for Cow<'_, str> {
    fn to_value(&self) -> Value {
        Value::String(self.clone().into_owned().into())
    }
}

impl ToValue for char {
    fn to_value(&self) -> Value {
        Value::String(self.to_string().into())
    }
}

impl ToValue for StringValue {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

/// Conversion of a mapping into event attributes, by reference so the
/// mapping itself passes through the expression.
///
/// Implemented for `HashMap`, `BTreeMap`, and slices, arrays, and `Vec`s of
/// `(key, value)` pairs.
pub trait ToEventAttributes {
    /// The key/value pairs to record for `self`.
    fn to_event_attributes(&self) -> Vec<KeyValue>;
}

impl<M: ToEventAttributes + ?Sized> ToEventAttributes for &M {
    fn to_event_attributes(&self) -> Vec<KeyValue> {
        (**self).to_event_attributes()
    }
}

impl<K: AsRef<str>, V: ToValue, S: BuildHasher> ToEventAttributes for HashMap<K, V, S> {
    fn to_event_attributes(&self) -> Vec<KeyValue> {
        self.iter()
            .map(|(key, value)| KeyValue::new(key.as_ref().to_owned(), value.to_value()))
            .collect()
    }
}

impl<K: AsRef<str>, V: ToValue> ToEventAttributes for BTreeMap<K, V> {
    fn to_event_attributes(&self) -> Vec<KeyValue> {
        self.iter()
            .map(|(key, value)| KeyValue::new(key.as_ref().to_owned(), value.to_value()))
            .collect()
    }
}

impl<K: AsRef<str>, V: ToValue> ToEventAttributes for [(K, V)] {
    fn to_event_attributes(&self) -> Vec<KeyValue> {
        self.iter()
            .map(|(key, value)| KeyValue::new(key.as_ref().to_owned(), value.to_value()))
            .collect()
    }
}

impl<K: AsRef<str>, V: ToValue, const N: usize> ToEventAttributes for [(K, V); N] {
    fn to_event_attributes(&self) -> Vec<KeyValue> {
        self.as_slice().to_event_attributes()
    }
}

impl<K: AsRef<str>, V: ToValue> ToEventAttributes for Vec<(K, V)> {
    fn to_event_attributes(&self) -> Vec<KeyValue> {
        self.as_slice().to_event_attributes()
    }
}

fn set_attribute(name: Cow<'static, str>, value: Value) {
    let cx = scope::current_context();
    if cx.has_active_span() {
        cx.span().set_attribute(KeyValue::new(name, value));
    }
}

/// `tell("k") | v`: set attribute `k = v` on the current span, then yield
/// `v`.
///
/// `|` has the loosest binding of the attribute operators, so it captures
/// the entire right-hand expression, like a log statement embedded at the
/// end of a computation.
impl<V: ToValue> BitOr<V> for Tell {
    type Output = V;

    fn bitor(self, value: V) -> V {
        set_attribute(self.name, value.to_value());
        value
    }
}

/// `tell("k") << v`: identical to `tell("k") | v`, with shift precedence.
impl<V: ToValue> Shl<V> for Tell {
    type Output = V;

    fn shl(self, value: V) -> V {
        set_attribute(self.name, value.to_value());
        value
    }
}

/// `tell("k") + v`: set attribute `k = v` on the current span, then yield
/// `v`.
///
/// `+` binds tightly, so it snapshots one term while the rest of the
/// expression continues: `tell("friends") + friends.len() as i64 + 1` records
/// the length and evaluates to length + 1.
impl<V: ToValue> Add<V> for Tell {
    type Output = V;

    fn add(self, value: V) -> V {
        set_attribute(self.name, value.to_value());
        value
    }
}

/// `tell("k") * m`: record an event named `k` on the current span, with the
/// mapping's pairs as event attributes, then yield the mapping.
impl<M: ToEventAttributes> Mul<M> for Tell {
    type Output = M;

    fn mul(self, attributes: M) -> M {
        let cx = scope::current_context();
        if cx.has_active_span() {
            cx.span()
                .add_event(self.name, attributes.to_event_attributes());
        }
        attributes
    }
}

/// `tell("k") >> m`: fan the mapping out into one `k.<key>` attribute per
/// pair on the current span, then yield the mapping.
impl<M: ToEventAttributes> Shr<M> for Tell {
    type Output = M;

    fn shr(self, attributes: M) -> M {
        let cx = scope::current_context();
        if cx.has_active_span() {
            let span = cx.span();
            for entry in attributes.to_event_attributes() {
                span.set_attribute(KeyValue::new(
                    format!("{}.{}", self.name, entry.key.as_str()),
                    entry.value,
                ));
            }
        }
        attributes
    }
}

/// Right-handed spellings for scalars: `v | tell("k")` reads as "pipe this
/// value into the trace" and behaves exactly like `tell("k") | v`.
///
/// Coherence limits these to concrete left-hand types, so mappings only get
/// the left-handed `*` and `>>` forms.
macro_rules! reverse_pipe {
    ($($t:ty),+ $(,)?) => {
        $(
            impl BitOr<Tell> for $t {
                type Output = $t;

                fn bitor(self, receiver: Tell) -> $t {
                    receiver | self
                }
            }
        )+
    };
}

reverse_pipe!(bool, i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64, char, String);

impl<'a> BitOr<Tell> for &'a str {
    type Output = &'a str;

    fn bitor(self, receiver: Tell) -> &'a str {
        receiver | self
    }
}
