use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crate::value::Value;

/// Decides whether two values are equal for caching purposes.
///
/// The check receives the new value, the stored value and the position of
/// the argument within the call's argument list.
#[derive(Clone)]
pub struct EqualityCheck(Kind);

#[derive(Clone)]
enum Kind {
    Reference,
    Structural,
    Custom(Arc<dyn Fn(&Value, &Value, usize) -> bool + Send + Sync>),
    PerPosition(Arc<[EqualityCheck]>),
}

impl EqualityCheck {
    /// Compare with [`Value::same`]. This is the default.
    pub fn reference() -> Self {
        Self(Kind::Reference)
    }

    /// Compare with the structural [`PartialEq`] implementation of [`Value`].
    pub fn structural() -> Self {
        Self(Kind::Structural)
    }

    /// Compare with a custom function of `(new, stored, index)`.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value, usize) -> bool + Send + Sync + 'static,
    {
        Self(Kind::Custom(Arc::new(f)))
    }

    /// Use a different check for each argument position.
    ///
    /// Positions past the end of the list use reference equality.
    pub fn per_position(checks: impl IntoIterator<Item = EqualityCheck>) -> Self {
        Self(Kind::PerPosition(checks.into_iter().collect()))
    }

    /// Whether `new` at position `index` equals `stored`.
    pub fn check(&self, new: &Value, stored: &Value, index: usize) -> bool {
        match &self.0 {
            Kind::Reference => new.same(stored),
            Kind::Structural => new == stored,
            Kind::Custom(f) => f(new, stored, index),
            Kind::PerPosition(checks) => match checks.get(index) {
                Some(check) => check.check(new, stored, index),
                None => new.same(stored),
            },
        }
    }

    /// Whether two argument lists are equal: same length and pairwise equal.
    pub fn args_equal(&self, new: &[Value], stored: &[Value]) -> bool {
        new.len() == stored.len()
            && new
                .iter()
                .zip(stored)
                .enumerate()
                .all(|(i, (a, b))| self.check(a, b, i))
    }
}

impl Default for EqualityCheck {
    fn default() -> Self {
        Self::reference()
    }
}

impl Debug for EqualityCheck {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match &self.0 {
            Kind::Reference => f.pad("EqualityCheck::Reference"),
            Kind::Structural => f.pad("EqualityCheck::Structural"),
            Kind::Custom(_) => f.pad("EqualityCheck::Custom(..)"),
            Kind::PerPosition(checks) => {
                f.debug_tuple("EqualityCheck::PerPosition").field(checks).finish()
            }
        }
    }
}
