use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::Result;

/// A dynamically typed value flowing through selectors.
///
/// Scalars are compared by value, while lists, records and functions are
/// shared behind an [`Arc`] and have an identity. The caches compare
/// arguments with [`Value::same`], which looks at that identity, so a
/// selector fed the same shared state twice recognizes it without walking
/// the structure.
#[derive(Clone, Default)]
pub enum Value {
    /// The absence of a value.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A number, stored as an `f64`.
    ///
    /// Integers beyond 2^53 lose precision on conversion, so distinct large
    /// integers may end up as the same value.
    Number(f64),
    /// An immutable string.
    Str(Arc<str>),
    /// A shared list of values.
    List(Arc<Vec<Value>>),
    /// A shared record with string keys.
    Record(Arc<Record>),
    /// A callable.
    Func(Func),
}

impl Value {
    /// Create a list value.
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::List(Arc::new(items.into_iter().map(Into::into).collect()))
    }

    /// Create a record value. Later duplicates of a key overwrite earlier ones.
    pub fn record<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Arc<str>>,
        V: Into<Value>,
    {
        Self::Record(Arc::new(fields.into_iter().collect()))
    }

    /// The name of this value's kind, as shown in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "array",
            Self::Record(_) => "object",
            Self::Func(_) => "function",
        }
    }

    /// Describe the value for configuration error messages.
    ///
    /// Functions are rendered with their name, everything else by kind.
    pub fn describe(&self) -> String {
        match self {
            Self::Func(func) => func.describe(),
            other => other.kind().into(),
        }
    }

    /// Reference equality.
    ///
    /// Scalars and strings compare by value, shared values by identity. `NaN`
    /// is equal to itself and `0.0` equals `-0.0`.
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Str(a), Self::Str(b)) => Arc::ptr_eq(a, b) || a == b,
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b),
            (Self::Record(a), Self::Record(b)) => Arc::ptr_eq(a, b),
            (Self::Func(a), Self::Func(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Whether this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&Func> {
        match self {
            Self::Func(v) => Some(v),
            _ => None,
        }
    }

    /// Look up a record field. Returns `None` for missing keys and for
    /// non-record values.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_record()?.get(key)
    }

    /// Look up a record field, yielding `Null` when it is absent.
    pub fn field(&self, key: &str) -> Value {
        self.get(key).cloned().unwrap_or_default()
    }
}

/// Structural equality.
///
/// Lists and records are compared element by element, functions by identity.
/// Numbers follow [`Value::same`], so every pair of values that is the same
/// is also structurally equal.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b) || a == b,
            (Self::Record(a), Self::Record(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => self.same(other),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Null => f.pad("null"),
            Self::Bool(v) => v.fmt(f),
            Self::Number(v) => v.fmt(f),
            Self::Str(v) => v.fmt(f),
            Self::List(v) => f.debug_list().entries(v.iter()).finish(),
            Self::Record(v) => v.fmt(f),
            Self::Func(v) => v.fmt(f),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

macro_rules! number_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Self::Number(v as f64)
            }
        })*
    };
}

number_from! { i32, i64, u32, u64, usize, f32 }

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v.into())
    }
}

impl From<Arc<str>> for Value {
    fn from(v: Arc<str>) -> Self {
        Self::Str(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::list(v)
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(v: [T; N]) -> Self {
        Self::list(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Self::Record(Arc::new(v))
    }
}

impl From<Func> for Value {
    fn from(v: Func) -> Self {
        Self::Func(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// An insertion-ordered map from string keys to values.
#[derive(Clone, Default)]
pub struct Record {
    /// The fields in insertion order.
    fields: Vec<(Arc<str>, Value)>,
    /// Maps from keys to indices in `fields`.
    index: FxHashMap<Arc<str>, usize>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field.
    ///
    /// An existing key keeps its position and has its value replaced, which
    /// is then returned.
    pub fn insert(&mut self, key: impl Into<Arc<str>>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&i) => Some(std::mem::replace(&mut self.fields[i].1, value)),
            None => {
                self.index.insert(key.clone(), self.fields.len());
                self.fields.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.fields[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Iterate over the fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (&**k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| &**k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Two records are equal if they have the same keys with equal values,
/// regardless of order.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.iter().all(|(k, v)| other.get(k).is_some_and(|w| v == w))
    }
}

impl Debug for Record {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<Arc<str>>,
    V: Into<Value>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

/// The shared body of a [`Func`].
type Body = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// A shared, optionally named callable.
///
/// Cloning a `Func` is cheap and preserves its identity: clones are the same
/// function under [`Value::same`].
#[derive(Clone)]
pub struct Func {
    name: Option<Arc<str>>,
    body: Arc<Body>,
}

impl Func {
    /// Create an unnamed function over the whole argument list.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self { name: None, body: Arc::new(f) }
    }

    /// Create a named function over the whole argument list.
    pub fn named<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self { name: Some(name.into()), body: Arc::new(f) }
    }

    /// Create an unnamed function of the first argument only. A missing
    /// argument is passed as `Null`.
    pub fn unary<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(move |args| match args.first() {
            Some(first) => f(first),
            None => f(&Value::Null),
        })
    }

    /// Give the function a name. The identity is kept.
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The function's name, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Invoke the function.
    #[inline]
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.body)(args)
    }

    /// Whether both are the same function.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }

    /// Render as `function <name>()` for error messages.
    pub fn describe(&self) -> String {
        format!("function {}()", self.name().unwrap_or("unnamed"))
    }
}

impl Debug for Func {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.pad(&self.describe())
    }
}
