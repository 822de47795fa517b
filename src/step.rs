//! A single pipeline stage.
//!
//! A step owns its guards, option mapping, and telemetry, and delegates
//! the actual work to its constructor inside the step-scoped callback
//! chain. Call order within one invocation: map options, before hooks,
//! guards, around chain wrapping the constructor, after hooks.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::callbacks::{Callbacks, Phase, Scope};
use crate::constructor::{Constructor, ConstructorFn};
use crate::error::{PipelineError, StepError};
use crate::pipeline::Pipeline;

/// Guard predicate over the incoming change set and the step itself.
/// Mapped options are computed before guards run, so guards may read them.
pub type GuardFn<C> = dyn Fn(&C, &Step<C>) -> bool;

/// Computes the step's mapped options from the incoming change set.
pub type MapOptionsFn<C> = dyn Fn(&C) -> BTreeMap<String, Value>;

/// Lifecycle status of a step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Registered but not yet reached
    Pending,
    /// Constructor produced a change set
    Success,
    /// Guard failed, constructor returned nothing, or an around callback
    /// dropped the continuation
    Skipped,
    /// Constructor, guard scope, or a step callback raised
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepStatus::Pending => "pending",
            StepStatus::Success => "success",
            StepStatus::Skipped => "skipped",
            StepStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// How the step's raw argument was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// An opaque key, resolved through registries and resolvers
    Key,
    /// An inline callable
    Callable,
    /// A nested pipeline
    Pipeline,
}

/// The raw value passed to `step(...)` before constructor resolution.
pub enum StepArgument<C> {
    /// An opaque key; resolvers and constructor tables decide what it means
    Key(String),
    /// A callable used directly as the step's unit of work
    Callable(Box<ConstructorFn<C>>),
    /// A nested pipeline executed on the change set
    Pipeline(Pipeline<C>),
}

impl<C> StepArgument<C> {
    pub fn key(name: impl Into<String>) -> Self {
        Self::Key(name.into())
    }

    pub fn call<F>(callable: F) -> Self
    where
        F: Fn(&Step<C>, &C) -> Result<Option<C>, StepError> + 'static,
    {
        Self::Callable(Box::new(callable))
    }

    pub fn pipeline(pipeline: Pipeline<C>) -> Self {
        Self::Pipeline(pipeline)
    }

    /// The key, when the argument is one.
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Self::Key(name) => Some(name),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> StepKind {
        match self {
            Self::Key(_) => StepKind::Key,
            Self::Callable(_) => StepKind::Callable,
            Self::Pipeline(_) => StepKind::Pipeline,
        }
    }
}

impl<C> From<&str> for StepArgument<C> {
    fn from(name: &str) -> Self {
        Self::Key(name.to_string())
    }
}

impl<C> From<String> for StepArgument<C> {
    fn from(name: String) -> Self {
        Self::Key(name)
    }
}

impl<C> From<Pipeline<C>> for StepArgument<C> {
    fn from(pipeline: Pipeline<C>) -> Self {
        Self::Pipeline(pipeline)
    }
}

/// Serializable telemetry snapshot of a step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub label: String,
    pub index: usize,
    pub kind: StepKind,
    pub argument: Option<String>,
    pub constructor: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

/// One pipeline stage.
pub struct Step<C> {
    kind: StepKind,
    label: String,
    argument: Option<String>,
    index: usize,
    constructor: Rc<Constructor<C>>,
    if_guard: Option<Box<GuardFn<C>>>,
    unless_guard: Option<Box<GuardFn<C>>>,
    options_mapper: Option<Box<MapOptionsFn<C>>>,
    extra_options: BTreeMap<String, Value>,
    mapped_options: BTreeMap<String, Value>,
    status: StepStatus,
    result: Option<C>,
    error: Option<StepError>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    duration: Option<Duration>,
}

struct Outcome<C> {
    change_set: C,
    produced: Option<C>,
}

impl<C> Step<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kind: StepKind,
        label: String,
        argument: Option<String>,
        index: usize,
        constructor: Rc<Constructor<C>>,
        if_guard: Option<Box<GuardFn<C>>>,
        unless_guard: Option<Box<GuardFn<C>>>,
        options_mapper: Option<Box<MapOptionsFn<C>>>,
        extra_options: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            kind,
            label,
            argument,
            index,
            constructor,
            if_guard,
            unless_guard,
            options_mapper,
            extra_options,
            mapped_options: BTreeMap::new(),
            status: StepStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
            duration: None,
        }
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The raw key this step was registered with, for loggers and
    /// diagnostics. Callable and nested-pipeline arguments have none.
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    /// Position in the pipeline, assigned at registration and never reused.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn constructor_name(&self) -> &str {
        self.constructor.name()
    }

    /// A user-defined option attached at registration.
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.extra_options.get(key)
    }

    /// Options computed from the change set at the start of the current
    /// invocation; empty before the step has run or without a mapper.
    pub fn mapped_options(&self) -> &BTreeMap<String, Value> {
        &self.mapped_options
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// The constructor's output from the last invocation, if it succeeded.
    pub fn result(&self) -> Option<&C> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&StepError> {
        self.error.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn report(&self) -> StepReport {
        StepReport {
            label: self.label.clone(),
            index: self.index,
            kind: self.kind,
            argument: self.argument.clone(),
            constructor: self.constructor.name().to_string(),
            status: self.status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_ms: self.duration.map(|d| d.as_millis() as u64),
            error: self.error.as_ref().map(|e| e.to_string()),
        }
    }
}

impl<C: Clone> Step<C> {
    /// Run the step on `change_set`, returning the change set for the next
    /// step: the constructor's output on success, the (hook-threaded)
    /// incoming change set on skip.
    ///
    /// Telemetry is written on every path, including failure; errors
    /// propagate after status and error are recorded.
    pub(crate) fn call(
        &mut self,
        change_set: C,
        callbacks: &Callbacks<C>,
    ) -> Result<C, PipelineError<C>> {
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.duration = None;
        self.error = None;
        self.result = None;
        let clock = Instant::now();

        let outcome = self.run(change_set, callbacks);

        self.finished_at = Some(Utc::now());
        self.duration = Some(clock.elapsed());

        match outcome {
            Ok(Outcome {
                change_set,
                produced,
            }) => {
                self.status = if produced.is_some() {
                    StepStatus::Success
                } else {
                    StepStatus::Skipped
                };
                self.result = produced;
                debug!(step = %self.label, index = self.index, status = %self.status, "step finished");
                Ok(change_set)
            }
            Err(error) => {
                self.status = StepStatus::Failed;
                self.error = Some(error.step_error().clone());
                debug!(step = %self.label, index = self.index, error = %error.step_error(), "step failed");
                Err(error)
            }
        }
    }

    fn run(&mut self, change_set: C, callbacks: &Callbacks<C>) -> Result<Outcome<C>, PipelineError<C>> {
        self.mapped_options = match &self.options_mapper {
            Some(mapper) => mapper(&change_set),
            None => BTreeMap::new(),
        };

        let change_set = callbacks.run_hooks(Scope::Step, Phase::Before, change_set)?;

        if self.guard_skips(&change_set) {
            let change_set = callbacks.run_hooks(Scope::Step, Phase::After, change_set)?;
            return Ok(Outcome {
                change_set,
                produced: None,
            });
        }

        let mut produced: Option<C> = None;
        let change_set = {
            let this: &Step<C> = self;
            let slot = &mut produced;
            callbacks.run_around(Scope::Step, change_set, &mut |change_set| {
                match this.constructor.call(this, &change_set)? {
                    Some(next) => {
                        *slot = Some(next.clone());
                        Ok(next)
                    }
                    None => Ok(change_set),
                }
            })?
        };

        let change_set = callbacks.run_hooks(Scope::Step, Phase::After, change_set)?;
        Ok(Outcome {
            change_set,
            produced,
        })
    }

    /// Guard order: `unless` first, then `if`. Unconfigured guards default
    /// to letting the step run.
    fn guard_skips(&self, change_set: &C) -> bool {
        if let Some(guard) = &self.unless_guard {
            if guard(change_set, self) {
                return true;
            }
        }

        match &self.if_guard {
            Some(guard) => !guard(change_set, self),
            None => false,
        }
    }
}

impl<C> fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("label", &self.label)
            .field("argument", &self.argument)
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("constructor", &self.constructor.name())
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
