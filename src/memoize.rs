use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::equality::EqualityCheck;
use crate::error::Result;
use crate::lru::LruList;
use crate::value::{Func, Value};

/// Options for the built-in LRU memoizer.
///
/// Other [`Memoize`] implementations receive the same options and are free
/// to use only the parts they understand.
#[derive(Debug, Clone)]
pub struct MemoizeOptions {
    /// How many argument lists to remember. Zero is treated as one.
    pub max_size: usize,
    /// Compares each new argument with the stored one at the same position.
    pub equality_check: EqualityCheck,
    /// If set, a freshly computed result that equals the most recently used
    /// stored result is replaced by the stored one.
    pub result_equality_check: Option<EqualityCheck>,
}

impl MemoizeOptions {
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_equality_check(mut self, check: EqualityCheck) -> Self {
        self.equality_check = check;
        self
    }

    pub fn with_result_equality_check(mut self, check: EqualityCheck) -> Self {
        self.result_equality_check = Some(check);
        self
    }
}

impl Default for MemoizeOptions {
    fn default() -> Self {
        Self {
            max_size: 1,
            equality_check: EqualityCheck::reference(),
            result_equality_check: None,
        }
    }
}

/// A bare equality check configures a single-entry cache.
impl From<EqualityCheck> for MemoizeOptions {
    fn from(check: EqualityCheck) -> Self {
        Self::default().with_equality_check(check)
    }
}

/// A memoized function.
///
/// Only `call` is required. Implementations without an inspectable or
/// clearable cache keep the default capability methods.
pub trait Memoized: Send + Sync {
    /// Call the function, possibly answering from the cache.
    fn call(&self, args: &[Value]) -> Result<Value>;

    /// Forget all cached results.
    fn clear_cache(&self) {}

    /// A snapshot of the cached entries, most recently used first, if the
    /// implementation exposes them.
    fn cache_entries(&self) -> Option<Vec<CacheEntry>> {
        None
    }
}

/// A cache implementation: turns a function into a memoized one.
///
/// This is implemented for closures of the shape
/// `Fn(Func, &MemoizeOptions) -> Arc<dyn Memoized>`.
pub trait Memoize: Send + Sync {
    fn memoize(&self, func: Func, options: &MemoizeOptions) -> Arc<dyn Memoized>;
}

impl<F> Memoize for F
where
    F: Fn(Func, &MemoizeOptions) -> Arc<dyn Memoized> + Send + Sync,
{
    fn memoize(&self, func: Func, options: &MemoizeOptions) -> Arc<dyn Memoized> {
        self(func, options)
    }
}

/// A stored argument list and its result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub args: Vec<Value>,
    pub result: Value,
}

/// The built-in cache implementation, producing [`LruMemoized`] functions.
#[derive(Debug, Default, Clone, Copy)]
pub struct LruMemoize;

impl Memoize for LruMemoize {
    fn memoize(&self, func: Func, options: &MemoizeOptions) -> Arc<dyn Memoized> {
        Arc::new(memoize(func, options.clone()))
    }
}

/// A cache implementation that does not cache. Used to switch a layer off.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unmemoized;

impl Memoize for Unmemoized {
    fn memoize(&self, func: Func, _: &MemoizeOptions) -> Arc<dyn Memoized> {
        Arc::new(Passthrough(func))
    }
}

/// Calls straight through to the function.
struct Passthrough(Func);

impl Memoized for Passthrough {
    fn call(&self, args: &[Value]) -> Result<Value> {
        self.0.call(args)
    }
}

/// Memoize a function with a bounded LRU cache.
///
/// ```
/// # use recall::{memoize, Func, MemoizeOptions, Value};
/// let upper = memoize(
///     Func::unary(|v| Ok(v.as_str().unwrap_or_default().to_uppercase().into())),
///     MemoizeOptions::default().with_max_size(3),
/// );
/// assert_eq!(upper.call(&["a".into()])?, Value::from("A"));
/// assert_eq!(upper.results_count(), 1);
/// # Ok::<(), recall::Error>(())
/// ```
pub fn memoize(func: Func, options: impl Into<MemoizeOptions>) -> LruMemoized {
    let options = options.into();
    LruMemoized {
        func,
        cache: Mutex::new(LruList::new(options.max_size)),
        equality_check: options.equality_check,
        result_equality_check: options.result_equality_check,
        results: AtomicUsize::new(0),
    }
}

/// A function memoized with a bounded LRU cache.
pub struct LruMemoized {
    /// The wrapped function.
    func: Func,
    /// Maps from argument lists to results.
    cache: Mutex<LruList<Vec<Value>, Value>>,
    /// Compares arguments positionally.
    equality_check: EqualityCheck,
    /// Compares a fresh result with the most recent stored one.
    result_equality_check: Option<EqualityCheck>,
    /// How many new results the function has produced.
    results: AtomicUsize,
}

impl LruMemoized {
    /// Call the function or return a cached result for equal arguments.
    ///
    /// Errors from the function are returned as they are and leave the
    /// cache untouched.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        // Check if there is a cached result. The lock is released before the
        // function runs so that it may call back into this cache.
        let cached = self
            .cache
            .lock()
            .get(|stored| self.equality_check.args_equal(args, stored))
            .cloned();

        if let Some(result) = cached {
            #[cfg(feature = "testing")]
            crate::testing::register_hit();
            return Ok(result);
        }

        let mut result = self.func.call(args)?;

        let mut cache = self.cache.lock();

        // A re-entrant call with the same arguments may have inserted a result
        // in the meantime. That's okay, the first one wins.
        if let Some(existing) = cache.get(|stored| self.equality_check.args_equal(args, stored))
        {
            #[cfg(feature = "testing")]
            crate::testing::register_miss();
            return Ok(existing.clone());
        }

        let reused = match (&self.result_equality_check, cache.front()) {
            (Some(check), Some((_, previous))) if check.check(&result, previous, 0) => {
                Some(previous.clone())
            }
            _ => None,
        };

        match reused {
            Some(previous) => result = previous,
            None => {
                self.results.fetch_add(1, Ordering::Relaxed);
            }
        }

        if cache.push_front(args.to_vec(), result.clone()).is_some() {
            tracing::trace!(max_size = cache.capacity(), "evicted least recently used entry");
        }

        #[cfg(feature = "testing")]
        crate::testing::register_miss();

        Ok(result)
    }

    /// Forget all cached results.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// The cached entries, most recently used first.
    pub fn cache_entries(&self) -> Vec<CacheEntry> {
        self.cache
            .lock()
            .iter()
            .map(|(args, result)| CacheEntry { args: args.clone(), result: result.clone() })
            .collect()
    }

    /// How many new results the function has produced.
    ///
    /// Misses whose result was replaced by an equal stored one are not
    /// counted.
    pub fn results_count(&self) -> usize {
        self.results.load(Ordering::Relaxed)
    }

    pub fn reset_results_count(&self) {
        self.results.store(0, Ordering::Relaxed);
    }

    /// The maximum number of cached entries.
    pub fn max_size(&self) -> usize {
        self.cache.lock().capacity()
    }
}

impl Memoized for LruMemoized {
    fn call(&self, args: &[Value]) -> Result<Value> {
        LruMemoized::call(self, args)
    }

    fn clear_cache(&self) {
        LruMemoized::clear_cache(self)
    }

    fn cache_entries(&self) -> Option<Vec<CacheEntry>> {
        Some(LruMemoized::cache_entries(self))
    }
}

impl Debug for LruMemoized {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("LruMemoized")
            .field("func", &self.func)
            .field("max_size", &self.max_size())
            .field("len", &self.cache.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    /// A memoized identity function that counts its calls.
    fn counting(options: MemoizeOptions) -> (LruMemoized, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let func = Func::new(move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(args.first().cloned().unwrap_or_default())
        });
        (memoize(func, options), calls)
    }

    #[test]
    fn test_hit_and_miss() {
        let (memo, calls) = counting(MemoizeOptions::default());
        assert_eq!(memo.call(&["a".into()]).unwrap(), Value::from("a"));
        assert_eq!(memo.call(&["a".into()]).unwrap(), Value::from("a"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(memo.call(&["b".into()]).unwrap(), Value::from("b"));
        assert_eq!(memo.call(&["a".into()]).unwrap(), Value::from("a"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(memo.results_count(), 3);
    }

    #[test]
    fn test_max_size_eviction() {
        let (memo, calls) = counting(MemoizeOptions::default().with_max_size(3));
        for key in ["a", "b", "c", "d"] {
            memo.call(&[key.into()]).unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        // `c` is still cached.
        memo.call(&["c".into()]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        // `a` was evicted.
        memo.call(&["a".into()]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let keys: Vec<_> = memo.cache_entries().into_iter().map(|e| e.result).collect();
        assert_eq!(keys, [Value::from("a"), "c".into(), "d".into()]);
    }

    #[test]
    fn test_argument_count_matters() {
        let (memo, calls) = counting(MemoizeOptions::default().with_max_size(2));
        memo.call(&[1.into()]).unwrap();
        memo.call(&[1.into(), 2.into()]).unwrap();
        memo.call(&[1.into()]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        memo.call(&[]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_nan_hits() {
        let (memo, calls) = counting(MemoizeOptions::default());
        memo.call(&[f64::NAN.into()]).unwrap();
        memo.call(&[f64::NAN.into()]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_custom_equality() {
        let options = MemoizeOptions::from(EqualityCheck::structural());
        let (memo, calls) = counting(options);
        let first = memo.call(&[Value::list([1, 2])]).unwrap();
        let second = memo.call(&[Value::list([1, 2])]).unwrap();
        assert!(first.same(&second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_result_equality_reuses_old_result() {
        let func = Func::unary(|v| Ok(Value::list([v.field("n")])));
        let memo = memoize(
            func,
            MemoizeOptions::default().with_result_equality_check(EqualityCheck::structural()),
        );

        let first = memo.call(&[Value::record([("n", 1)])]).unwrap();
        let state = Value::record([("n", 1)]);
        let second = memo.call(&[state.clone()]).unwrap();
        assert!(first.same(&second));
        assert_eq!(memo.results_count(), 1);

        // The new arguments became the cache key.
        let entries = memo.cache_entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].args[0].same(&state));

        let third = memo.call(&[Value::record([("n", 2)])]).unwrap();
        assert!(!third.same(&second));
        assert_eq!(memo.results_count(), 2);
    }

    #[test]
    fn test_error_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let memo = memoize(
            Func::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::msg("nope"))
            }),
            MemoizeOptions::default(),
        );
        assert_eq!(memo.call(&[1.into()]).unwrap_err().to_string(), "nope");
        assert_eq!(memo.call(&[1.into()]).unwrap_err().to_string(), "nope");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(memo.cache_entries().is_empty());
    }

    #[test]
    fn test_error_keeps_existing_entries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let memo = memoize(
            Func::unary(move |v| {
                counter.fetch_add(1, Ordering::SeqCst);
                match v.as_str() {
                    Some("x") => Err(Error::msg("bad key")),
                    _ => Ok(v.clone()),
                }
            }),
            MemoizeOptions::default(),
        );

        let first = memo.call(&["a".into()]).unwrap();
        assert!(memo.call(&["x".into()]).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // `a` is still cached in the single slot.
        let second = memo.call(&["a".into()]).unwrap();
        assert!(first.same(&second));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(memo.results_count(), 1);
        assert_eq!(memo.cache_entries().len(), 1);
    }

    #[test]
    fn test_clear_cache() {
        let (memo, calls) = counting(MemoizeOptions::default());
        memo.call(&[1.into()]).unwrap();
        memo.clear_cache();
        assert!(memo.cache_entries().is_empty());
        memo.call(&[1.into()]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reentrant_call() {
        let memo: Arc<Mutex<Option<Arc<LruMemoized>>>> = Arc::new(Mutex::new(None));
        let handle = memo.clone();
        let func = Func::unary(move |v| {
            let n = v.as_f64().unwrap_or_default();
            if n <= 0.0 {
                return Ok(Value::from(0));
            }
            let inner = handle.lock().clone().expect("installed");
            let rest = inner.call(&[Value::from(n - 1.0)])?;
            Ok(Value::from(n + rest.as_f64().unwrap_or_default()))
        });
        let memoized = Arc::new(memoize(func, MemoizeOptions::default().with_max_size(8)));
        *memo.lock() = Some(memoized.clone());
        assert_eq!(memoized.call(&[3.into()]).unwrap(), Value::from(6));
        assert_eq!(memoized.cache_entries().len(), 4);
    }

    #[test]
    fn test_unmemoized_always_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let func = Func::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });
        let memo = Unmemoized.memoize(func, &MemoizeOptions::default());
        memo.call(&[]).unwrap();
        memo.call(&[]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(memo.cache_entries(), None);
    }

    #[test]
    fn test_closure_is_memoize() {
        let custom = |func: Func, options: &MemoizeOptions| -> Arc<dyn Memoized> {
            Arc::new(memoize(func, options.clone().with_max_size(4)))
        };
        let memo = custom.memoize(Func::new(|_| Ok(Value::Null)), &MemoizeOptions::default());
        memo.call(&[]).unwrap();
        assert_eq!(memo.cache_entries().map(|e| e.len()), Some(1));
    }
}
