//! Error types for configuration and execution.
//!
//! Two families, by origin:
//! - `ConfigError`: raised synchronously while a pipeline is being
//!   configured (duplicate registrations, unresolvable constructors).
//! - `StepError` / `PipelineError`: raised while a pipeline is executing.
//!   `StepError` is what user code raises; the engine wraps it in
//!   `PipelineError` and attaches a `FailureContext` describing where the
//!   run failed.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discriminator tag for execution errors.
///
/// Kinds are plain string tags; their "is-a" relationships are declared
/// separately on an [`ErrorTaxonomy`](crate::taxonomy::ErrorTaxonomy),
/// which is what error callbacks match against.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorKind(String);

impl ErrorKind {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ErrorKind {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for ErrorKind {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

/// An execution error raised by a constructor, guard body, or callback.
///
/// Cloneable so a failed step can retain its error as telemetry while the
/// original propagates.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StepError {
    kind: ErrorKind,
    message: String,
}

impl StepError {
    pub fn new(kind: impl Into<ErrorKind>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors raised while configuring a pipeline.
///
/// These are always fatal and surface immediately from the configuration
/// method that caused them; nothing is partially registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A constructor with this name is already registered in the same scope
    #[error("constructor `{name}` is already registered")]
    DuplicateConstructor { name: String },

    /// A second constructor was flagged `default: true`
    #[error("default constructor is already defined")]
    DuplicateDefaultConstructor,

    /// A step supplied both an inline callable and a named constructor
    #[error("step `{label}` specifies both an inline callable and constructor `{name}`")]
    AmbiguousConstructor { label: String, name: String },

    /// No constructor could be found or resolved for a step argument
    #[error("could not resolve a constructor for step `{label}`")]
    UnresolvedConstructor { label: String },

    /// A user option key collides with a built-in step option
    #[error("`{key}` is reserved and cannot be used as a step option")]
    ReservedOptionKey { key: String },
}

/// Where a run failed: the change set at the failure site and the failing
/// step, exposed read-only for diagnostics and error handlers.
#[derive(Debug, Clone)]
pub struct FailureContext<C> {
    /// Change set as it entered the failing step (or the run, for failures
    /// outside any step)
    pub change_set: C,

    /// Label of the failing step, if the failure happened inside one
    pub step_label: Option<String>,

    /// Index of the failing step, if any
    pub step_index: Option<usize>,
}

/// An execution error decorated with failure context.
///
/// The wrapped [`StepError`] is unchanged: callers match and report on the
/// same kind and message that user code raised; the context is additive.
#[derive(Debug, Clone)]
pub struct PipelineError<C> {
    error: StepError,
    context: Option<FailureContext<C>>,
}

impl<C> PipelineError<C> {
    pub fn new(error: StepError) -> Self {
        Self {
            error,
            context: None,
        }
    }

    /// The underlying error as raised by user code.
    pub fn step_error(&self) -> &StepError {
        &self.error
    }

    pub fn kind(&self) -> &ErrorKind {
        self.error.kind()
    }

    /// Failure context, present once the error has crossed the engine.
    pub fn context(&self) -> Option<&FailureContext<C>> {
        self.context.as_ref()
    }

    /// Attach context at the failure site. Decoration happens once; a
    /// context attached deeper in the run (e.g. by a nested pipeline step)
    /// is kept.
    pub(crate) fn with_context(mut self, context: FailureContext<C>) -> Self {
        if self.context.is_none() {
            self.context = Some(context);
        }
        self
    }

    /// Collapse back to the plain step error, dropping context.
    pub fn into_step_error(self) -> StepError {
        self.error
    }
}

impl<C> From<StepError> for PipelineError<C> {
    fn from(error: StepError) -> Self {
        Self::new(error)
    }
}

impl<C> fmt::Display for PipelineError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<C: fmt::Debug> std::error::Error for PipelineError<C> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
