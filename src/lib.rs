//! Memoized selectors for derived state.
//!
//! A selector combines one or more _input functions_, which pick values out
//! of the call arguments, with a _combiner_ that computes a result from those
//! values. The combiner only runs again when the picked values change, so a
//! selector called with the same state twice hands back the very same result.
//!
//! ```
//! use recall::{create_selector, Func, Value};
//!
//! let todos = Func::unary(|state| Ok(state.field("todos")));
//! let count = create_selector([todos], Func::unary(|todos| {
//!     Ok(Value::from(todos.as_list().map_or(0, <[_]>::len)))
//! }))?;
//!
//! let state = Value::record([("todos", Value::list([1, 2, 3]))]);
//! assert_eq!(count.select(&state)?, Value::from(3));
//! assert_eq!(count.select(&state)?, Value::from(3));
//! assert_eq!(count.recomputations(), 1);
//! # Ok::<(), recall::Error>(())
//! ```
//!
//! Caching happens on two layers, both pluggable through [`Memoize`]: the
//! dispatch layer remembers call arguments, the combiner layer remembers the
//! values produced by the input functions. The built-in [`LruMemoize`] keeps
//! a bounded number of entries and compares arguments with an
//! [`EqualityCheck`], by default reference equality.

mod checks;
mod creator;
mod equality;
mod error;
mod lru;
mod memoize;
mod selector;
mod structured;
#[cfg(feature = "testing")]
mod testing;
mod value;

pub use crate::checks::{
    CheckFrequency, DevModeChecks, Diagnostic, DiagnosticSink, global_dev_mode_checks,
    set_global_dev_mode_checks,
};
pub use crate::creator::{
    CreatorConfig, SelectorCreator, create_selector, create_selector_creator,
    create_selector_with,
};
pub use crate::equality::EqualityCheck;
pub use crate::error::{Error, Result};
pub use crate::memoize::{
    CacheEntry, LruMemoize, LruMemoized, Memoize, MemoizeOptions, Memoized, Unmemoized,
    memoize,
};
pub use crate::selector::{Selector, SelectorOptions};
pub use crate::structured::{StructuredSelectorCreator, create_structured_selector};
pub use crate::value::{Func, Record, Value};

/// These are implementation details. Do not rely on them!
#[doc(hidden)]
pub mod internal {
    pub use crate::lru::LruList;
    #[cfg(feature = "testing")]
    pub use crate::testing::{counts, last_was_hit, reset_counts};
}
