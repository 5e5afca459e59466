use std::sync::Arc;

use crate::creator::SelectorCreator;
use crate::error::{Error, Result};
use crate::selector::Selector;
use crate::value::{Func, Record, Value};

/// Create a selector that returns a record with the same keys as `inputs`,
/// each holding the result of the input function stored under that key.
///
/// `inputs` must be a record of functions. Unnamed functions are named after
/// their key. The selector is built with `creator`, or with the default
/// creator if `None`.
///
/// ```
/// # use recall::{create_structured_selector, Func, Value};
/// let inputs = Value::record([
///     ("todos", Func::unary(|s| Ok(s.field("todos")))),
///     ("alerts", Func::unary(|s| Ok(s.field("alerts")))),
/// ]);
/// let selector = create_structured_selector(&inputs, None)?;
/// let state = Value::record([("todos", Value::list([1])), ("alerts", Value::list([2]))]);
/// let result = selector.select(&state)?;
/// assert_eq!(result.get("todos"), Some(&Value::list([1])));
/// # Ok::<(), recall::Error>(())
/// ```
pub fn create_structured_selector(
    inputs: &Value,
    creator: Option<&SelectorCreator>,
) -> Result<Selector> {
    let Some(record) = inputs.as_record() else {
        return Err(Error::configuration(format!(
            "create_structured_selector expects first argument to be an object where \
             each property is a selector, instead received a {}",
            inputs.kind(),
        )));
    };

    let keys: Vec<Arc<str>> = record.keys().map(Arc::from).collect();
    let funcs = collect_functions(record)?;

    // Reassemble the derived values under their keys.
    let combiner = Func::named("structured", move |values| {
        Ok(keys.iter().cloned().zip(values.iter().cloned()).collect::<Record>().into())
    });

    match creator {
        Some(creator) => creator.create(funcs, combiner),
        None => SelectorCreator::default().create(funcs, combiner),
    }
}

/// Creates structured selectors with a fixed selector creator.
#[derive(Debug, Clone, Default)]
pub struct StructuredSelectorCreator {
    creator: SelectorCreator,
}

impl StructuredSelectorCreator {
    /// Build structured selectors with `creator`.
    pub fn new(creator: SelectorCreator) -> Self {
        Self { creator }
    }

    /// Create a structured selector.
    pub fn create(&self, inputs: &Value) -> Result<Selector> {
        create_structured_selector(inputs, Some(&self.creator))
    }

    /// Returns an identical creator.
    pub fn with_types(&self) -> Self {
        self.clone()
    }
}

/// Make sure every property holds a function.
fn collect_functions(record: &Record) -> Result<Vec<Func>> {
    let named = |key: &str, value: &Value| match value {
        Value::Func(func) if func.name().is_none() => Value::Func(func.clone().with_name(key)),
        other => other.clone(),
    };

    let Some((key, value)) = record.iter().find(|(_, value)| value.as_func().is_none()) else {
        return Ok(record
            .iter()
            .filter_map(|(key, value)| named(key, value).as_func().cloned())
            .collect());
    };

    let types: Vec<_> = record.iter().map(|(k, v)| named(k, v).describe()).collect();
    Err(Error::configuration(format!(
        "create_structured_selector expects every property to be a selector function, \
         but property `{key}` has type {} ({value:?}). Received the following types: [{}]",
        value.kind(),
        types.join(", "),
    )))
}
