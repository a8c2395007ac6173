use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A single position in a [`CacheKey`] tuple.
///
/// Key values compare shallowly: primitives by value, [`Token`](Self::Token)s by the
/// identity of the allocation they point to. Values of different variants never
/// compare equal, even if they would convert into one another.
#[derive(Clone)]
pub enum KeyValue {
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// An unsigned integer.
    UInt(u64),
    /// A floating point number, compared by bit pattern.
    Float(f64),
    /// A string, compared by contents.
    Str(Arc<str>),
    /// An opaque reference, compared by identity.
    ///
    /// Two tokens are only equal if they point to the same allocation. Cloning a
    /// token (or the [`Arc`] it was created from) preserves its identity; wrapping
    /// an equal but distinct value in a new `Arc` does not.
    Token(Arc<dyn Any + Send + Sync>),
}

impl KeyValue {
    /// Creates a [`Token`](Self::Token) key value from an owned value.
    ///
    /// The token is only ever equal to clones of itself, so hold on to it (or the
    /// [`CacheKey`] containing it) and reuse it for lookups that should match.
    pub fn token<T: Any + Send + Sync>(value: T) -> Self {
        Self::Token(Arc::new(value))
    }

    /// Creates a [`Token`](Self::Token) key value sharing the given allocation.
    ///
    /// Tokens created from clones of the same [`Arc`] compare equal.
    pub fn token_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self::Token(value)
    }

    /// Compares two key values under shallow equality.
    pub fn shallow_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Token(a), Self::Token(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            _ => false,
        }
    }
}

impl fmt::Debug for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Self::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Self::UInt(v) => f.debug_tuple("UInt").field(v).finish(),
            Self::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Self::Str(v) => f.debug_tuple("Str").field(v).finish(),
            Self::Token(v) => write!(f, "Token({:p})", Arc::as_ptr(v)),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Token(v) => write!(f, "{:p}", Arc::as_ptr(v)),
        }
    }
}

impl From<bool> for KeyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for KeyValue {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<f64> for KeyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        Self::Str(value.into())
    }
}

impl From<Arc<str>> for KeyValue {
    fn from(value: Arc<str>) -> Self {
        Self::Str(value)
    }
}

/// An ordered tuple of values identifying one logical request.
///
/// Two keys match if they have the same length and every position is pairwise equal
/// under [`KeyValue::shallow_eq`]. This is a deliberately cheap comparison: pass
/// primitive values or identity-stable [`Token`](KeyValue::Token)s as key elements,
/// no deep equality is ever performed.
#[derive(Debug, Clone, Default)]
pub struct CacheKey {
    values: Vec<KeyValue>,
}

impl CacheKey {
    /// Creates a key from an ordered sequence of values.
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self { values }
    }

    /// The values making up this key, in order.
    pub fn values(&self) -> &[KeyValue] {
        &self.values
    }

    /// Compares two keys position by position under shallow equality.
    pub fn matches(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a.shallow_eq(b))
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl From<Vec<KeyValue>> for CacheKey {
    fn from(values: Vec<KeyValue>) -> Self {
        Self::new(values)
    }
}

impl<V: Into<KeyValue>> FromIterator<V> for CacheKey {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, "]")
    }
}
