use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::memoize::{LruMemoize, Memoize, MemoizeOptions, Unmemoized};
use crate::selector::{Selector, SelectorConfig, SelectorOptions};
use crate::value::{Func, Value};

/// How a selector creator is configured.
///
/// Either a full options record, or a cache implementation with options for
/// it, as in `(LruMemoize, EqualityCheck::structural())`. Both are normalized
/// into the same settings when the creator is built.
#[derive(Clone)]
pub enum CreatorConfig {
    /// An options record. Its `memoize` field is required.
    Options(SelectorOptions),
    /// A combiner-layer cache implementation and its options.
    Positional(Arc<dyn Memoize>, MemoizeOptions),
}

impl CreatorConfig {
    /// Use a cache implementation with default options.
    pub fn memoize(memoize: impl Memoize + 'static) -> Self {
        Self::Positional(Arc::new(memoize), MemoizeOptions::default())
    }

    /// Resolve into the settings every selector of the creator starts from.
    fn normalize(self) -> Result<SelectorConfig> {
        let defaults = SelectorConfig::default();
        match self {
            Self::Options(options) if options.memoize.is_none() => Err(Error::configuration(
                "create_selector_creator expects a memoize function, but none was given",
            )),
            Self::Options(options) => Ok(defaults.apply(options)),
            Self::Positional(memoize, memoize_options) => {
                Ok(SelectorConfig { memoize, memoize_options, ..defaults })
            }
        }
    }
}

/// The empty configuration. It names no cache implementation, so creating a
/// selector creator from it fails.
impl Default for CreatorConfig {
    fn default() -> Self {
        Self::Options(SelectorOptions::default())
    }
}

impl From<SelectorOptions> for CreatorConfig {
    fn from(options: SelectorOptions) -> Self {
        Self::Options(options)
    }
}

impl<M, O> From<(M, O)> for CreatorConfig
where
    M: Memoize + 'static,
    O: Into<MemoizeOptions>,
{
    fn from((memoize, options): (M, O)) -> Self {
        Self::Positional(Arc::new(memoize), options.into())
    }
}

impl From<Arc<dyn Memoize>> for CreatorConfig {
    fn from(memoize: Arc<dyn Memoize>) -> Self {
        Self::Positional(memoize, MemoizeOptions::default())
    }
}

impl From<LruMemoize> for CreatorConfig {
    fn from(memoize: LruMemoize) -> Self {
        Self::memoize(memoize)
    }
}

impl From<Unmemoized> for CreatorConfig {
    fn from(memoize: Unmemoized) -> Self {
        Self::memoize(memoize)
    }
}

impl Debug for CreatorConfig {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Options(options) => f.debug_tuple("Options").field(options).finish(),
            Self::Positional(_, options) => {
                f.debug_tuple("Positional").field(&"..").field(options).finish()
            }
        }
    }
}

/// Creates selectors with a fixed set of cache implementations and options.
#[derive(Clone, Default)]
pub struct SelectorCreator {
    config: SelectorConfig,
}

/// Build a selector creator.
///
/// ```
/// # use recall::{create_selector_creator, EqualityCheck, Func, LruMemoize, Value};
/// let create = create_selector_creator((LruMemoize, EqualityCheck::structural()))?;
/// let total = create.create(
///     [Func::unary(|s| Ok(s.field("items")))],
///     Func::unary(|items| Ok(Value::from(items.as_list().map_or(0, <[_]>::len)))),
/// )?;
/// assert_eq!(total.select(&Value::record([("items", Value::list([1, 2]))]))?, Value::from(2));
/// # Ok::<(), recall::Error>(())
/// ```
pub fn create_selector_creator(config: impl Into<CreatorConfig>) -> Result<SelectorCreator> {
    let config = config.into();
    tracing::debug!(?config, "creating selector creator");
    Ok(SelectorCreator { config: config.normalize()? })
}

impl SelectorCreator {
    /// Create a selector from input functions and a combiner.
    ///
    /// The inputs may also be given as a single list of functions.
    pub fn create<I>(&self, inputs: I, combiner: impl Into<Func>) -> Result<Selector>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.create_with(inputs, combiner, SelectorOptions::default())
    }

    /// Create a selector with per-selector options.
    pub fn create_with<I>(
        &self,
        inputs: I,
        combiner: impl Into<Func>,
        options: SelectorOptions,
    ) -> Result<Selector>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Selector::compose(
            inputs.into_iter().map(Into::into).collect(),
            combiner.into(),
            self.config.apply(options),
        )
    }

    /// Create a selector from an argument list whose last element is the
    /// combiner. This is what [`create_selector!`](crate::create_selector)
    /// expands to.
    pub fn create_from(&self, mut args: Vec<Value>, options: SelectorOptions) -> Result<Selector> {
        let combiner = match args.pop() {
            Some(Value::Func(func)) => func,
            other => {
                return Err(Error::configuration(format!(
                    "create_selector expects an output function after the inputs, but \
                     received: [{}]",
                    other.map_or_else(|| "nothing".into(), |value| value.describe()),
                )));
            }
        };
        Selector::compose(args, combiner, self.config.apply(options))
    }

    /// Returns an identical creator.
    ///
    /// Exists for parity with typed selector APIs; it has no effect.
    pub fn with_types(&self) -> Self {
        self.clone()
    }
}

impl Debug for SelectorCreator {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("SelectorCreator")
            .field("memoize_options", &self.config.memoize_options)
            .field("args_memoize_options", &self.config.args_memoize_options)
            .field("dev_mode_checks", &self.config.dev_mode_checks)
            .finish_non_exhaustive()
    }
}

/// Create a selector with the default LRU caches on both layers.
///
/// ```
/// # use recall::{create_selector, Func, Value};
/// let ids = create_selector(
///     [Func::unary(|s| Ok(s.field("todos")))],
///     Func::unary(|todos| {
///         Ok(Value::list(todos.as_list().unwrap_or_default().iter().map(|t| t.field("id"))))
///     }),
/// )?;
/// let state = Value::record([("todos", Value::list([Value::record([("id", 0)])]))]);
/// assert!(ids.select(&state)?.same(&ids.select(&state)?));
/// assert_eq!(ids.recomputations(), 1);
/// # Ok::<(), recall::Error>(())
/// ```
pub fn create_selector<I>(inputs: I, combiner: impl Into<Func>) -> Result<Selector>
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    SelectorCreator::default().create(inputs, combiner)
}

/// Create a selector with per-selector options on the default creator.
pub fn create_selector_with<I>(
    inputs: I,
    combiner: impl Into<Func>,
    options: SelectorOptions,
) -> Result<Selector>
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    SelectorCreator::default().create_with(inputs, combiner, options)
}

/// Create a selector from input functions followed by a combiner.
///
/// The inputs can be listed one by one or as a single array, and per-selector
/// options can follow a semicolon:
///
/// ```
/// # use recall::{create_selector, Func, SelectorOptions, Value};
/// let a = Func::unary(|s| Ok(s.field("a")));
/// let b = Func::unary(|s| Ok(s.field("b")));
/// let sum = Func::new(|v| Ok(Value::from(v.iter().filter_map(Value::as_f64).sum::<f64>())));
///
/// let listed = create_selector!([a.clone(), b.clone()], sum.clone())?;
/// let spread = create_selector!(a, b, sum; SelectorOptions::default())?;
/// assert_eq!(listed.dependencies().len(), spread.dependencies().len());
/// # Ok::<(), recall::Error>(())
/// ```
#[macro_export]
macro_rules! create_selector {
    ($($arg:expr),+ ; $options:expr $(,)?) => {
        $crate::SelectorCreator::default().create_from(
            ::std::vec![$($crate::Value::from($arg)),+],
            $options,
        )
    };
    ($($arg:expr),+ $(,)?) => {
        $crate::SelectorCreator::default().create_from(
            ::std::vec![$($crate::Value::from($arg)),+],
            $crate::SelectorOptions::default(),
        )
    };
}
