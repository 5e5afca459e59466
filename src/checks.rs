//! Development-mode checks for selector authoring mistakes.
//!
//! The checks only run in builds with debug assertions. They never change a
//! selector's result and never fail a call; findings are reported as
//! [`Diagnostic`]s to a [`DiagnosticSink`], or logged with `tracing` if none
//! is configured.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::equality::EqualityCheck;
use crate::value::{Func, Record, Value};

/// Process-wide defaults for check frequencies.
static GLOBAL: RwLock<Frequencies> = RwLock::new(Frequencies {
    input_stability_check: CheckFrequency::Once,
    identity_function_check: CheckFrequency::Once,
});

/// How often a check runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckFrequency {
    /// On every dispatch.
    Always,
    /// On a selector's first dispatch only.
    Once,
    /// Never.
    Never,
}

impl CheckFrequency {
    /// Whether a check with this frequency runs now.
    pub fn should_run(self, first_run: bool) -> bool {
        match self {
            Self::Always => true,
            Self::Once => first_run,
            Self::Never => false,
        }
    }
}

/// Check frequency settings. Unset fields fall back to the next level: a
/// selector's settings override its creator's, which override the global
/// defaults.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DevModeChecks {
    /// Re-run input functions and warn if they return different values.
    pub input_stability_check: Option<CheckFrequency>,
    /// Warn if the combiner returns its single input unchanged.
    pub identity_function_check: Option<CheckFrequency>,
}

impl DevModeChecks {
    pub fn with_input_stability_check(mut self, frequency: CheckFrequency) -> Self {
        self.input_stability_check = Some(frequency);
        self
    }

    pub fn with_identity_function_check(mut self, frequency: CheckFrequency) -> Self {
        self.identity_function_check = Some(frequency);
        self
    }

    /// Layer `other` on top of `self`: fields set in `other` win.
    pub fn merge(self, other: Self) -> Self {
        Self {
            input_stability_check: other.input_stability_check.or(self.input_stability_check),
            identity_function_check: other
                .identity_function_check
                .or(self.identity_function_check),
        }
    }

    /// Fill unset fields from the current global defaults.
    pub(crate) fn resolve(self) -> Frequencies {
        let global = *GLOBAL.read();
        Frequencies {
            input_stability_check: self
                .input_stability_check
                .unwrap_or(global.input_stability_check),
            identity_function_check: self
                .identity_function_check
                .unwrap_or(global.identity_function_check),
        }
    }
}

/// Fully resolved check frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Frequencies {
    pub input_stability_check: CheckFrequency,
    pub identity_function_check: CheckFrequency,
}

/// Change the global default frequencies. Unset fields are left alone.
///
/// Selectors read the defaults on every dispatch, so this also affects
/// existing selectors that do not configure the checks themselves.
pub fn set_global_dev_mode_checks(checks: DevModeChecks) {
    let mut global = GLOBAL.write();
    if let Some(frequency) = checks.input_stability_check {
        global.input_stability_check = frequency;
    }
    if let Some(frequency) = checks.identity_function_check {
        global.identity_function_check = frequency;
    }
}

/// The current global default frequencies.
pub fn global_dev_mode_checks() -> DevModeChecks {
    let global = *GLOBAL.read();
    DevModeChecks {
        input_stability_check: Some(global.input_stability_check),
        identity_function_check: Some(global.identity_function_check),
    }
}

/// A finding of a development-mode check.
#[derive(Debug, Clone)]
pub enum Diagnostic {
    /// An input function returned different values for the same arguments.
    InputStability {
        arguments: Vec<Value>,
        first_inputs: Vec<Value>,
        second_inputs: Vec<Value>,
    },
    /// The combiner returned its input without transforming it.
    IdentityFunction { combiner: Func },
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::InputStability { .. } => f.write_str(
                "an input selector returned a different result when passed the same \
                 arguments; the selector will likely recompute more often than \
                 intended. Avoid returning a new reference from an input selector",
            ),
            Self::IdentityFunction { .. } => f.write_str(
                "the result function returned its own input without modification, \
                 which defeats memoization. Move transformation logic such as map, \
                 filter or reduce into the result function",
            ),
        }
    }
}

/// Receives diagnostics from development-mode checks.
pub type DiagnosticSink = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

/// Deliver a diagnostic to the sink, or log it.
pub(crate) fn emit(sink: Option<&DiagnosticSink>, diagnostic: Diagnostic) {
    match sink {
        Some(sink) => sink(&diagnostic),
        None => match &diagnostic {
            Diagnostic::InputStability { arguments, first_inputs, second_inputs } => {
                tracing::warn!(?arguments, ?first_inputs, ?second_inputs, "{diagnostic}")
            }
            Diagnostic::IdentityFunction { combiner } => {
                tracing::warn!(?combiner, "{diagnostic}")
            }
        },
    }
}

/// Re-run the input functions and compare against the first run.
///
/// Errors during the re-run are ignored, the original call already
/// succeeded.
pub(crate) fn run_input_stability_check(
    dependencies: &[Func],
    arguments: &[Value],
    first_inputs: &[Value],
    equality_check: &EqualityCheck,
    sink: Option<&DiagnosticSink>,
) {
    let Ok(second_inputs) = dependencies
        .iter()
        .map(|dependency| dependency.call(arguments))
        .collect::<Result<Vec<_>, _>>()
    else {
        return;
    };

    if !equality_check.args_equal(&second_inputs, first_inputs) {
        emit(
            sink,
            Diagnostic::InputStability {
                arguments: arguments.to_vec(),
                first_inputs: first_inputs.to_vec(),
                second_inputs,
            },
        );
    }
}

/// Detect a combiner that hands its single input back unchanged.
pub(crate) fn run_identity_function_check(
    combiner: &Func,
    inputs: &[Value],
    output: &Value,
    sink: Option<&DiagnosticSink>,
) {
    if inputs.len() != 1 || !inputs[0].same(output) {
        return;
    }

    // The output may coincide with the input by accident, so probe with a
    // value the combiner has never seen.
    let probe = Value::from(Record::new());
    let is_identity = combiner.call(std::slice::from_ref(&probe)).is_ok_and(|out| out.same(&probe));

    if is_identity {
        emit(sink, Diagnostic::IdentityFunction { combiner: combiner.clone() });
    }
}
