use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::checks::{self, DevModeChecks, Diagnostic, DiagnosticSink};
use crate::equality::EqualityCheck;
use crate::error::{Error, Result};
use crate::memoize::{LruMemoize, Memoize, MemoizeOptions, Memoized};
use crate::value::{Func, Value};

/// Per-selector settings. Unset fields fall back to the creator's settings.
#[derive(Default, Clone)]
pub struct SelectorOptions {
    /// The cache implementation for the combiner layer.
    pub memoize: Option<Arc<dyn Memoize>>,
    /// Options for the combiner-layer cache.
    pub memoize_options: Option<MemoizeOptions>,
    /// The cache implementation for the dispatch layer.
    pub args_memoize: Option<Arc<dyn Memoize>>,
    /// Options for the dispatch-layer cache.
    pub args_memoize_options: Option<MemoizeOptions>,
    /// Development-mode check frequencies.
    pub dev_mode_checks: DevModeChecks,
    /// Where development-mode diagnostics go.
    pub diagnostics: Option<DiagnosticSink>,
}

impl SelectorOptions {
    pub fn memoize(mut self, memoize: impl Memoize + 'static) -> Self {
        self.memoize = Some(Arc::new(memoize));
        self
    }

    pub fn memoize_options(mut self, options: impl Into<MemoizeOptions>) -> Self {
        self.memoize_options = Some(options.into());
        self
    }

    pub fn args_memoize(mut self, memoize: impl Memoize + 'static) -> Self {
        self.args_memoize = Some(Arc::new(memoize));
        self
    }

    pub fn args_memoize_options(mut self, options: impl Into<MemoizeOptions>) -> Self {
        self.args_memoize_options = Some(options.into());
        self
    }

    pub fn dev_mode_checks(mut self, checks: DevModeChecks) -> Self {
        self.dev_mode_checks = checks;
        self
    }

    pub fn diagnostics<F>(mut self, sink: F) -> Self
    where
        F: Fn(&Diagnostic) + Send + Sync + 'static,
    {
        self.diagnostics = Some(Arc::new(sink));
        self
    }
}

impl Debug for SelectorOptions {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("SelectorOptions")
            .field("memoize", &self.memoize.as_ref().map(|_| ".."))
            .field("memoize_options", &self.memoize_options)
            .field("args_memoize", &self.args_memoize.as_ref().map(|_| ".."))
            .field("args_memoize_options", &self.args_memoize_options)
            .field("dev_mode_checks", &self.dev_mode_checks)
            .finish_non_exhaustive()
    }
}

/// Fully resolved settings for building a selector.
#[derive(Clone)]
pub(crate) struct SelectorConfig {
    pub memoize: Arc<dyn Memoize>,
    pub memoize_options: MemoizeOptions,
    pub args_memoize: Arc<dyn Memoize>,
    pub args_memoize_options: MemoizeOptions,
    pub dev_mode_checks: DevModeChecks,
    pub diagnostics: Option<DiagnosticSink>,
}

impl SelectorConfig {
    /// Layer per-selector options on top.
    pub fn apply(&self, options: SelectorOptions) -> Self {
        Self {
            memoize: options.memoize.unwrap_or_else(|| self.memoize.clone()),
            memoize_options: options
                .memoize_options
                .unwrap_or_else(|| self.memoize_options.clone()),
            args_memoize: options.args_memoize.unwrap_or_else(|| self.args_memoize.clone()),
            args_memoize_options: options
                .args_memoize_options
                .unwrap_or_else(|| self.args_memoize_options.clone()),
            dev_mode_checks: self.dev_mode_checks.merge(options.dev_mode_checks),
            diagnostics: options.diagnostics.or_else(|| self.diagnostics.clone()),
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            memoize: Arc::new(LruMemoize),
            memoize_options: MemoizeOptions::default(),
            args_memoize: Arc::new(LruMemoize),
            args_memoize_options: MemoizeOptions::default(),
            dev_mode_checks: DevModeChecks::default(),
            diagnostics: None,
        }
    }
}

/// A memoized function deriving a result from the outputs of its input
/// functions.
///
/// Calls go through two caches. The dispatch layer remembers the call
/// arguments and skips the input functions entirely when they repeat. The
/// combiner layer remembers the derived values and skips the combiner when
/// the input functions produced the same values again.
///
/// Cloning a selector is cheap; clones share their caches and counters.
#[derive(Clone)]
pub struct Selector(Arc<Inner>);

struct Inner {
    /// The input functions.
    dependencies: Vec<Func>,
    /// The raw combiner.
    result_func: Func,
    /// The combiner behind the combiner-layer cache.
    memoized_result_func: Arc<dyn Memoized>,
    /// The dispatch step behind the dispatch-layer cache.
    dispatch: Arc<dyn Memoized>,
    /// Calls the dispatch layer. Kept so that the selector has a stable
    /// identity when used as a value.
    func: Func,
    /// Counters and the last result.
    state: Arc<State>,
}

#[derive(Default)]
struct State {
    recomputations: AtomicUsize,
    dependency_recomputations: AtomicUsize,
    last_result: Mutex<Option<Value>>,
    /// Set after the first successful dispatch.
    dispatched: AtomicBool,
}

impl Selector {
    /// Build a selector from input functions and a combiner.
    ///
    /// A single list argument is flattened into the input functions, so
    /// `[list(f, g)]` and `[f, g]` are equivalent.
    pub(crate) fn compose(
        inputs: Vec<Value>,
        combiner: Func,
        config: SelectorConfig,
    ) -> Result<Self> {
        let dependencies = collect_dependencies(inputs)?;
        let state = Arc::new(State::default());

        // Count actual runs of the combiner.
        let counted = {
            let state = state.clone();
            let inner = combiner.clone();
            let shim = move |inputs: &[Value]| {
                state.recomputations.fetch_add(1, Ordering::Relaxed);
                inner.call(inputs)
            };
            match combiner.name() {
                Some(name) => Func::named(name, shim),
                None => Func::new(shim),
            }
        };
        let memoized_result_func = config.memoize.memoize(counted, &config.memoize_options);

        let dispatcher = Dispatcher {
            dependencies: dependencies.clone(),
            result_func: combiner.clone(),
            memoized_result_func: memoized_result_func.clone(),
            state: state.clone(),
            dev_mode_checks: config.dev_mode_checks,
            stability_check: config.args_memoize_options.equality_check.clone(),
            diagnostics: config.diagnostics.clone(),
        };
        let dispatch = config.args_memoize.memoize(
            Func::named("dispatch", move |args| dispatcher.dispatch(args)),
            &config.args_memoize_options,
        );

        let func = {
            let dispatch = dispatch.clone();
            Func::new(move |args| dispatch.call(args))
        };

        tracing::debug!(dependencies = dependencies.len(), "created selector");

        Ok(Self(Arc::new(Inner {
            dependencies,
            result_func: combiner,
            memoized_result_func,
            dispatch,
            func,
            state,
        })))
    }

    /// Evaluate the selector.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        self.0.dispatch.call(args)
    }

    /// Evaluate the selector with a single argument.
    pub fn select(&self, state: &Value) -> Result<Value> {
        self.call(std::slice::from_ref(state))
    }

    /// The input functions, in order.
    pub fn dependencies(&self) -> &[Func] {
        &self.0.dependencies
    }

    /// The combiner, without memoization.
    pub fn result_func(&self) -> &Func {
        &self.0.result_func
    }

    /// The combiner behind its cache.
    pub fn memoized_result_func(&self) -> &Arc<dyn Memoized> {
        &self.0.memoized_result_func
    }

    /// The most recently produced result.
    pub fn last_result(&self) -> Option<Value> {
        self.0.state.last_result.lock().clone()
    }

    /// How many times the combiner ran.
    pub fn recomputations(&self) -> usize {
        self.0.state.recomputations.load(Ordering::Relaxed)
    }

    pub fn reset_recomputations(&self) {
        self.0.state.recomputations.store(0, Ordering::Relaxed);
    }

    /// How many times the input functions ran, that is, how many calls the
    /// dispatch layer did not answer from its cache.
    pub fn dependency_recomputations(&self) -> usize {
        self.0.state.dependency_recomputations.load(Ordering::Relaxed)
    }

    pub fn reset_dependency_recomputations(&self) {
        self.0.state.dependency_recomputations.store(0, Ordering::Relaxed);
    }

    /// Clear both the dispatch-layer and the combiner-layer cache.
    ///
    /// Counters are kept.
    pub fn clear_cache(&self) {
        self.0.dispatch.clear_cache();
        self.0.memoized_result_func.clear_cache();
    }

    /// The selector as a function, for use as an input of other selectors.
    ///
    /// Every call returns the same function.
    pub fn as_func(&self) -> Func {
        self.0.func.clone()
    }
}

impl Debug for Selector {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Selector")
            .field("dependencies", &self.0.dependencies)
            .field("result_func", &self.0.result_func)
            .field("recomputations", &self.recomputations())
            .finish_non_exhaustive()
    }
}

impl From<Selector> for Func {
    fn from(selector: Selector) -> Self {
        selector.as_func()
    }
}

impl From<&Selector> for Func {
    fn from(selector: &Selector) -> Self {
        selector.as_func()
    }
}

impl From<Selector> for Value {
    fn from(selector: Selector) -> Self {
        Value::Func(selector.as_func())
    }
}

impl From<&Selector> for Value {
    fn from(selector: &Selector) -> Self {
        Value::Func(selector.as_func())
    }
}

/// The dispatch step: run the inputs, then the memoized combiner.
struct Dispatcher {
    dependencies: Vec<Func>,
    result_func: Func,
    memoized_result_func: Arc<dyn Memoized>,
    state: Arc<State>,
    dev_mode_checks: DevModeChecks,
    stability_check: EqualityCheck,
    diagnostics: Option<DiagnosticSink>,
}

impl Dispatcher {
    fn dispatch(&self, args: &[Value]) -> Result<Value> {
        self.state.dependency_recomputations.fetch_add(1, Ordering::Relaxed);

        let inputs = self
            .dependencies
            .iter()
            .map(|dependency| dependency.call(args))
            .collect::<Result<Vec<_>>>()?;

        let result = self.memoized_result_func.call(&inputs)?;
        *self.state.last_result.lock() = Some(result.clone());

        if cfg!(debug_assertions) {
            self.run_checks(args, &inputs, &result);
        }

        Ok(result)
    }

    fn run_checks(&self, args: &[Value], inputs: &[Value], result: &Value) {
        let first_run = !self.state.dispatched.swap(true, Ordering::Relaxed);
        let frequencies = self.dev_mode_checks.resolve();
        let sink = self.diagnostics.as_ref();

        if frequencies.identity_function_check.should_run(first_run) {
            checks::run_identity_function_check(&self.result_func, inputs, result, sink);
        }

        if frequencies.input_stability_check.should_run(first_run) {
            checks::run_input_stability_check(
                &self.dependencies,
                args,
                inputs,
                &self.stability_check,
                sink,
            );
        }
    }
}

/// Flatten a single list argument and make sure every input is a function.
fn collect_dependencies(inputs: Vec<Value>) -> Result<Vec<Func>> {
    let inputs = match inputs.as_slice() {
        [Value::List(list)] => list.to_vec(),
        _ => inputs,
    };

    if let Some(position) = inputs.iter().position(|input| input.as_func().is_none()) {
        let types: Vec<_> = inputs.iter().map(Value::describe).collect();
        return Err(Error::configuration(format!(
            "create_selector expects all input selectors to be functions, but the \
             input selector at position {position} has type {}. Received the \
             following types: [{}]",
            inputs[position].kind(),
            types.join(", "),
        )));
    }

    Ok(inputs
        .into_iter()
        .filter_map(|input| match input {
            Value::Func(func) => Some(func),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::CheckFrequency;
    use crate::memoize::Unmemoized;

    fn quiet() -> SelectorOptions {
        SelectorOptions::default().dev_mode_checks(
            DevModeChecks::default()
                .with_input_stability_check(CheckFrequency::Never)
                .with_identity_function_check(CheckFrequency::Never),
        )
    }

    fn compose(inputs: Vec<Value>, combiner: Func, options: SelectorOptions) -> Result<Selector> {
        Selector::compose(inputs, combiner, SelectorConfig::default().apply(options))
    }

    fn sum() -> Func {
        Func::new(|inputs| {
            Ok(inputs.iter().filter_map(Value::as_f64).sum::<f64>().into())
        })
    }

    #[test]
    fn test_flatten_single_list() {
        let a = Func::unary(|s| Ok(s.field("a")));
        let b = Func::unary(|s| Ok(s.field("b")));
        let listed = compose(vec![Value::list([a.clone(), b.clone()])], sum(), quiet()).unwrap();
        let plain = compose(vec![a.into(), b.into()], sum(), quiet()).unwrap();
        assert_eq!(listed.dependencies().len(), 2);
        assert!(listed
            .dependencies()
            .iter()
            .zip(plain.dependencies())
            .all(|(x, y)| x.ptr_eq(y)));
    }

    #[test]
    fn test_non_function_input() {
        let a = Func::named("a", |_| Ok(Value::Null));
        let err = compose(vec![a.into(), "d".into()], sum(), quiet()).unwrap_err();
        assert!(err.is_configuration());
        let message = err.to_string();
        assert!(message.contains("position 1 has type string"), "{message}");
        assert!(message.contains("[function a(), string]"), "{message}");
    }

    #[test]
    fn test_list_among_inputs_is_rejected() {
        let a = Func::new(|_| Ok(Value::Null));
        let err = compose(vec![Value::list([a.clone()]), a.into()], sum(), quiet()).unwrap_err();
        assert!(err.to_string().contains("position 0 has type array"));
    }

    #[test]
    fn test_counters() {
        let a = Func::unary(|s| Ok(s.field("a")));
        let b = Func::unary(|s| Ok(s.field("b")));
        let selector = compose(vec![a.into(), b.into()], sum(), quiet()).unwrap();

        let state = Value::record([("a", 1), ("b", 2)]);
        assert_eq!(selector.select(&state).unwrap(), Value::from(3));
        assert_eq!(selector.select(&state).unwrap(), Value::from(3));
        assert_eq!(selector.recomputations(), 1);
        assert_eq!(selector.dependency_recomputations(), 1);

        // A new state with equal fields reruns the inputs, not the combiner.
        let copy = Value::record([("a", 1), ("b", 2)]);
        assert_eq!(selector.select(&copy).unwrap(), Value::from(3));
        assert_eq!(selector.recomputations(), 1);
        assert_eq!(selector.dependency_recomputations(), 2);

        assert_eq!(selector.last_result(), Some(Value::from(3)));
        selector.reset_recomputations();
        selector.reset_dependency_recomputations();
        assert_eq!(selector.recomputations(), 0);
        assert_eq!(selector.dependency_recomputations(), 0);
    }

    #[test]
    fn test_without_dispatch_layer() {
        let a = Func::unary(|s| Ok(s.field("a")));
        let selector =
            compose(vec![a.into()], sum(), quiet().args_memoize(Unmemoized)).unwrap();
        let state = Value::record([("a", 1)]);
        selector.select(&state).unwrap();
        selector.select(&state).unwrap();
        assert_eq!(selector.dependency_recomputations(), 2);
        assert_eq!(selector.recomputations(), 1);
    }

    #[test]
    fn test_clear_cache_keeps_counters() {
        let a = Func::unary(|s| Ok(s.field("a")));
        let selector = compose(vec![a.into()], sum(), quiet()).unwrap();
        let state = Value::record([("a", 1)]);
        selector.select(&state).unwrap();
        selector.clear_cache();
        assert_eq!(selector.recomputations(), 1);
        assert_eq!(selector.memoized_result_func().cache_entries(), Some(vec![]));
        selector.select(&state).unwrap();
        assert_eq!(selector.recomputations(), 2);
        assert_eq!(selector.dependency_recomputations(), 2);
    }

    #[test]
    fn test_errors_propagate() {
        let failing = Func::new(|_| Err(Error::msg("input failed")));
        let selector = compose(vec![failing.into()], sum(), quiet()).unwrap();
        let err = selector.call(&[]).unwrap_err();
        assert_eq!(err.to_string(), "input failed");
        assert_eq!(selector.recomputations(), 0);
        assert_eq!(selector.last_result(), None);

        let a = Func::unary(|s| Ok(s.field("a")));
        let combiner = Func::new(|_| Err(Error::msg("combiner failed")));
        let selector = compose(vec![a.into()], combiner, quiet()).unwrap();
        let state = Value::record([("a", 1)]);
        assert!(selector.select(&state).is_err());
        assert!(selector.select(&state).is_err());
        assert_eq!(selector.recomputations(), 2);
    }

    #[test]
    fn test_failed_call_keeps_cached_result() {
        let a = Func::unary(|s| Ok(s.field("a")));
        let combiner = Func::unary(|a| match a.as_f64() {
            Some(n) if n < 0.0 => Err(Error::msg("negative")),
            _ => Ok(Value::list([a.clone()])),
        });
        let selector = compose(vec![a.into()], combiner, quiet()).unwrap();

        let good = Value::record([("a", 1)]);
        let bad = Value::record([("a", -1)]);
        let first = selector.select(&good).unwrap();
        assert!(selector.select(&bad).is_err());
        assert!(selector.last_result().is_some_and(|last| last.same(&first)));

        let second = selector.select(&good).unwrap();
        assert!(first.same(&second));
        assert_eq!(selector.recomputations(), 2);
        assert_eq!(selector.dependency_recomputations(), 2);
    }

    #[test]
    fn test_input_stability_uses_dispatch_equality() {
        fn stability_reports(options: SelectorOptions) -> usize {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = seen.clone();
            let options = options
                .dev_mode_checks(
                    DevModeChecks::default()
                        .with_input_stability_check(CheckFrequency::Always)
                        .with_identity_function_check(CheckFrequency::Never),
                )
                .diagnostics(move |d| sink.lock().push(d.clone()));

            // Returns a fresh but structurally equal list on every call.
            let wrapped = Func::unary(|s| Ok(Value::list([s.field("a")])));
            let selector = compose(vec![wrapped.into()], Func::new(|_| Ok(Value::Null)), options)
                .unwrap();
            selector.select(&Value::record([("a", 1)])).unwrap();

            let seen = seen.lock();
            seen.iter().filter(|d| matches!(d, Diagnostic::InputStability { .. })).count()
        }

        let structural = SelectorOptions::default().args_memoize_options(EqualityCheck::structural());
        assert_eq!(stability_reports(structural), 0);

        let expected = if cfg!(debug_assertions) { 1 } else { 0 };
        assert_eq!(stability_reports(SelectorOptions::default()), expected);
    }

    #[test]
    fn test_selector_as_input() {
        let a = Func::unary(|s| Ok(s.field("a")));
        let inner = compose(vec![a.into()], sum(), quiet()).unwrap();
        assert!(inner.as_func().ptr_eq(&inner.as_func()));

        let double = Func::unary(|v| Ok((v.as_f64().unwrap_or_default() * 2.0).into()));
        let outer = compose(vec![inner.clone().into()], double, quiet()).unwrap();
        let state = Value::record([("a", 21)]);
        assert_eq!(outer.select(&state).unwrap(), Value::from(42));
        assert_eq!(inner.recomputations(), 1);
    }

    #[test]
    fn test_dev_mode_checks_report_to_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = SelectorOptions::default()
            .dev_mode_checks(
                DevModeChecks::default()
                    .with_input_stability_check(CheckFrequency::Always)
                    .with_identity_function_check(CheckFrequency::Once),
            )
            .diagnostics(move |d| sink.lock().push(d.to_string()));

        let unstable = Func::unary(|s| Ok(Value::list([s.field("a")])));
        let identity = Func::unary(|v| Ok(v.clone()));
        let selector = compose(vec![unstable.into()], identity, options).unwrap();

        let first = Value::record([("a", 1)]);
        let second = Value::record([("a", 2)]);
        let result = selector.select(&first).unwrap();
        assert_eq!(result, Value::list([1]));
        selector.select(&second).unwrap();

        let seen = seen.lock();
        let identity = seen.iter().filter(|m| m.contains("own input")).count();
        let stability = seen.iter().filter(|m| m.contains("different result")).count();
        if cfg!(debug_assertions) {
            assert_eq!(identity, 1);
            assert_eq!(stability, 2);
        } else {
            assert!(seen.is_empty());
        }
    }
}
