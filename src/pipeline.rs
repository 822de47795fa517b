//! Pipeline: configuration surface and execution algorithm.
//!
//! A pipeline is built single-threaded through its configuration methods,
//! then executed any number of times. Each `execute` threads a change set
//! through the registered steps inside the execution-scoped callback
//! chain, recovering from errors through the registered error callbacks:
//! once inside the step fold (continue), once at the boundary (recovered
//! result).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::callbacks::{Callbacks, Continuation, Phase, Scope};
use crate::constructor::{Constructor, ConstructorFn, ConstructorOptions};
use crate::error::{ConfigError, ErrorKind, FailureContext, PipelineError, StepError};
use crate::error_callback::ErrorCallback;
use crate::logger::{StatusLog, StepLogger};
use crate::registry::ConstructorRegistry;
use crate::step::{GuardFn, MapOptionsFn, Step, StepArgument, StepKind, StepReport};
use crate::taxonomy::ErrorTaxonomy;

/// Resolver consulted at step registration when no explicit constructor is
/// given; returns a constructor key or `None`.
pub type StepResolverFn<C> = dyn Fn(&StepArgument<C>) -> Option<String>;

/// Step-sequencing execution engine over change sets of type `C`.
pub struct Pipeline<C> {
    steps: Vec<Step<C>>,
    constructors: ConstructorRegistry<C>,
    shared_constructors: Option<Rc<ConstructorRegistry<C>>>,
    resolvers: Vec<Box<StepResolverFn<C>>>,
    error_callbacks: Vec<ErrorCallback<C>>,
    taxonomy: ErrorTaxonomy,
    callbacks: Callbacks<C>,
    logger: Box<dyn StepLogger<C>>,
    status_log: Option<Rc<RefCell<StatusLog>>>,
    current_step: Option<usize>,
    current_arg: Option<C>,
}

impl<C: Clone + 'static> Default for Pipeline<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clone + 'static> Pipeline<C> {
    pub fn new() -> Self {
        let status_log = Rc::new(RefCell::new(StatusLog::new()));
        Self {
            steps: Vec::new(),
            constructors: ConstructorRegistry::new(),
            shared_constructors: None,
            resolvers: Vec::new(),
            error_callbacks: Vec::new(),
            taxonomy: ErrorTaxonomy::new(),
            callbacks: Callbacks::new(),
            logger: Box::new(Rc::clone(&status_log)),
            status_log: Some(status_log),
            current_step: None,
            current_arg: None,
        }
    }

    /// Build a pipeline through a configuration closure.
    pub fn configure<F>(configure: F) -> Result<Self, ConfigError>
    where
        F: FnOnce(&mut Self) -> Result<(), ConfigError>,
    {
        let mut pipeline = Self::new();
        configure(&mut pipeline)?;
        Ok(pipeline)
    }

    /// Inject a shared constructor registry, consulted after the
    /// pipeline-local table.
    pub fn with_registry(mut self, registry: Rc<ConstructorRegistry<C>>) -> Self {
        self.shared_constructors = Some(registry);
        self
    }

    /// Replace the step logger. The default [`StatusLog`] handle is
    /// dropped; [`status_log`](Self::status_log) returns `None` afterwards.
    pub fn set_logger<L>(&mut self, logger: L)
    where
        L: StepLogger<C> + 'static,
    {
        self.logger = Box::new(logger);
        self.status_log = None;
    }

    /// Reading handle on the default logger, while it is still installed.
    pub fn status_log(&self) -> Option<Rc<RefCell<StatusLog>>> {
        self.status_log.clone()
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Register a named constructor in the pipeline-local table.
    pub fn constructor<F>(
        &mut self,
        name: impl Into<String>,
        options: ConstructorOptions,
        callable: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&Step<C>, &C) -> Result<Option<C>, StepError> + 'static,
    {
        self.constructors.register(name, options, callable)
    }

    /// Append a step resolver. Custom resolvers replace the default
    /// key-is-the-constructor-name resolution.
    pub fn resolver<F>(&mut self, resolver: F)
    where
        F: Fn(&StepArgument<C>) -> Option<String> + 'static,
    {
        self.resolvers.push(Box::new(resolver));
    }

    /// Declare `child` error kind as a subtype of `parent` for error
    /// callback matching.
    pub fn derive_error(&mut self, child: impl Into<ErrorKind>, parent: impl Into<ErrorKind>) {
        self.taxonomy.derive(child, parent);
    }

    pub fn taxonomy(&self) -> &ErrorTaxonomy {
        &self.taxonomy
    }

    /// Register an error callback for the given kinds. First-registered
    /// matching callback wins; order more specific handlers first.
    pub fn on_error<I, K, F>(&mut self, kinds: I, halt_on_error: bool, handler: F)
    where
        I: IntoIterator<Item = K>,
        K: Into<ErrorKind>,
        F: Fn(Option<&Step<C>>, &C, &StepError) -> C + 'static,
    {
        let kinds = kinds.into_iter().map(Into::into).collect();
        self.error_callbacks
            .push(ErrorCallback::new(kinds, halt_on_error, handler));
    }

    /// Register an error callback matching every error kind.
    pub fn on_any_error<F>(&mut self, halt_on_error: bool, handler: F)
    where
        F: Fn(Option<&Step<C>>, &C, &StepError) -> C + 'static,
    {
        self.error_callbacks
            .push(ErrorCallback::new(Vec::new(), halt_on_error, handler));
    }

    pub fn before_step<F>(&mut self, hook: F)
    where
        F: Fn(C) -> Result<C, StepError> + 'static,
    {
        self.callbacks.register_hook(Scope::Step, Phase::Before, hook);
    }

    pub fn after_step<F>(&mut self, hook: F)
    where
        F: Fn(C) -> Result<C, StepError> + 'static,
    {
        self.callbacks.register_hook(Scope::Step, Phase::After, hook);
    }

    pub fn around_step<F>(&mut self, callback: F)
    where
        F: for<'a> Fn(C, Continuation<'a, C>) -> Result<C, PipelineError<C>> + 'static,
    {
        self.callbacks.register_around(Scope::Step, callback);
    }

    pub fn before_execution<F>(&mut self, hook: F)
    where
        F: Fn(C) -> Result<C, StepError> + 'static,
    {
        self.callbacks
            .register_hook(Scope::Execution, Phase::Before, hook);
    }

    pub fn after_execution<F>(&mut self, hook: F)
    where
        F: Fn(C) -> Result<C, StepError> + 'static,
    {
        self.callbacks
            .register_hook(Scope::Execution, Phase::After, hook);
    }

    pub fn around_execution<F>(&mut self, callback: F)
    where
        F: for<'a> Fn(C, Continuation<'a, C>) -> Result<C, PipelineError<C>> + 'static,
    {
        self.callbacks.register_around(Scope::Execution, callback);
    }

    /// Start registering a step; finish with [`StepBuilder::register`].
    pub fn step(&mut self, argument: impl Into<StepArgument<C>>) -> StepBuilder<'_, C> {
        StepBuilder {
            pipeline: self,
            argument: argument.into(),
            label: None,
            constructor_name: None,
            inline: None,
            if_guard: None,
            unless_guard: None,
            options_mapper: None,
            extra: BTreeMap::new(),
            pending_error: None,
        }
    }

    /// Shorthand for a step built from an inline callable.
    pub fn step_fn<F>(&mut self, callable: F) -> StepBuilder<'_, C>
    where
        F: Fn(&Step<C>, &C) -> Result<Option<C>, StepError> + 'static,
    {
        self.step(StepArgument::call(callable))
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn steps(&self) -> &[Step<C>] {
        &self.steps
    }

    pub fn reports(&self) -> Vec<StepReport> {
        self.steps.iter().map(Step::report).collect()
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Execute the pipeline on `change_set`.
    ///
    /// Re-entrant: the cursor is reset per run and step telemetry is
    /// overwritten, not accumulated. Returns the final change set, the
    /// result of a boundary error handler, or the decorated error.
    pub fn execute(&mut self, change_set: C) -> Result<C, PipelineError<C>> {
        let run_id = Uuid::new_v4();
        let span = tracing::debug_span!("pipeline_execution", %run_id);
        let _entered = span.enter();

        info!(steps = self.steps.len(), "starting pipeline execution");
        self.current_step = None;
        self.current_arg = Some(change_set.clone());

        match self.execute_inner(change_set) {
            Ok(result) => {
                info!("pipeline execution completed");
                Ok(result)
            }
            Err(error) => self.recover_at_boundary(error),
        }
    }

    fn execute_inner(&mut self, change_set: C) -> Result<C, PipelineError<C>> {
        let Self {
            steps,
            callbacks,
            error_callbacks,
            taxonomy,
            logger,
            current_step,
            current_arg,
            ..
        } = self;
        let callbacks: &Callbacks<C> = callbacks;

        let change_set = callbacks.run_hooks(Scope::Execution, Phase::Before, change_set)?;

        let mut body = |mut change_set: C| -> Result<C, PipelineError<C>> {
            for (index, step) in steps.iter_mut().enumerate() {
                *current_step = Some(index);
                let snapshot = change_set.clone();
                *current_arg = Some(snapshot.clone());

                match step.call(change_set, callbacks) {
                    Ok(next) => {
                        logger.record(step);
                        change_set = next;
                    }
                    Err(error) => {
                        let error = error.with_context(FailureContext {
                            change_set: snapshot.clone(),
                            step_label: Some(step.label().to_string()),
                            step_index: Some(index),
                        });

                        let recovery = error_callbacks
                            .iter()
                            .find(|callback| callback.applies_to(error.step_error(), taxonomy));

                        match recovery {
                            Some(callback) if !callback.halts() => {
                                logger.record(step);
                                warn!(
                                    step = %step.label(),
                                    error = %error.step_error(),
                                    "step failed, recovered and continuing"
                                );
                                callback.invoke(Some(step), &snapshot, error.step_error());
                                change_set = snapshot;
                            }
                            _ => return Err(error),
                        }
                    }
                }
            }
            Ok(change_set)
        };

        let change_set = callbacks.run_around(Scope::Execution, change_set, &mut body)?;
        callbacks
            .run_hooks(Scope::Execution, Phase::After, change_set)
            .map_err(PipelineError::from)
    }

    /// Last-chance recovery at the pipeline boundary: log the step the run
    /// stopped on, rescan the error callbacks, and either return the
    /// handler's result or re-raise the decorated error.
    fn recover_at_boundary(&mut self, error: PipelineError<C>) -> Result<C, PipelineError<C>> {
        let Self {
            steps,
            error_callbacks,
            taxonomy,
            logger,
            current_step,
            current_arg,
            ..
        } = self;

        let step = current_step.and_then(|index| steps.get(index));
        if let Some(step) = step {
            logger.record(step);
        }

        let error = match current_arg.as_ref() {
            Some(arg) => error.with_context(FailureContext {
                change_set: arg.clone(),
                step_label: step.map(|s| s.label().to_string()),
                step_index: *current_step,
            }),
            None => error,
        };

        let recovery = error_callbacks
            .iter()
            .find(|callback| callback.applies_to(error.step_error(), taxonomy));

        match (recovery, current_arg.as_ref()) {
            (Some(callback), Some(arg)) => {
                warn!(error = %error.step_error(), "recovered at pipeline boundary");
                Ok(callback.invoke(step, arg, error.step_error()))
            }
            _ => {
                warn!(error = %error.step_error(), "pipeline execution failed");
                Err(error)
            }
        }
    }

    // ------------------------------------------------------------------
    // Constructor resolution
    // ------------------------------------------------------------------

    fn lookup_constructor(&self, name: &str) -> Option<Rc<Constructor<C>>> {
        self.constructors.get(name).or_else(|| {
            self.shared_constructors
                .as_ref()
                .and_then(|registry| registry.get(name))
        })
    }

    fn default_constructor(&self) -> Option<Rc<Constructor<C>>> {
        self.constructors.default_constructor().or_else(|| {
            self.shared_constructors
                .as_ref()
                .and_then(|registry| registry.default_constructor())
        })
    }

    /// Resolution order for steps without an explicit constructor:
    /// resolvers (or the key-is-the-name default), then the argument
    /// itself (callable or nested pipeline), then the default constructor.
    fn resolve_constructor(
        &self,
        argument: StepArgument<C>,
        label: &str,
    ) -> Result<Rc<Constructor<C>>, ConfigError> {
        if self.resolvers.is_empty() {
            if let Some(key) = argument.as_key() {
                if let Some(constructor) = self.lookup_constructor(key) {
                    return Ok(constructor);
                }
            }
        } else {
            for resolver in &self.resolvers {
                if let Some(name) = resolver(&argument) {
                    if let Some(constructor) = self.lookup_constructor(&name) {
                        return Ok(constructor);
                    }
                }
            }
        }

        match argument {
            StepArgument::Callable(callable) => Ok(Rc::new(Constructor::inline(callable))),
            StepArgument::Pipeline(nested) => Ok(Rc::new(Self::nested_constructor(nested))),
            StepArgument::Key(_) => {
                self.default_constructor()
                    .ok_or_else(|| ConfigError::UnresolvedConstructor {
                        label: label.to_string(),
                    })
            }
        }
    }

    /// Adapt a nested pipeline into a constructor: the sub-pipeline runs
    /// on the change set, and its decorated error collapses back to the
    /// plain step error for the outer pipeline to match on.
    fn nested_constructor(nested: Pipeline<C>) -> Constructor<C> {
        let nested = RefCell::new(nested);
        Constructor::new(
            "pipeline",
            ConstructorOptions::default(),
            move |_step: &Step<C>, change_set: &C| {
                nested
                    .borrow_mut()
                    .execute(change_set.clone())
                    .map(Some)
                    .map_err(PipelineError::into_step_error)
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn register_step(
        &mut self,
        kind: StepKind,
        label: String,
        argument: Option<String>,
        constructor: Rc<Constructor<C>>,
        if_guard: Option<Box<GuardFn<C>>>,
        unless_guard: Option<Box<GuardFn<C>>>,
        options_mapper: Option<Box<MapOptionsFn<C>>>,
        extra: BTreeMap<String, Value>,
    ) -> usize {
        let index = self.steps.len();
        debug!(step = %label, index, constructor = constructor.name(), "registered step");
        self.steps.push(Step::new(
            kind,
            label,
            argument,
            index,
            constructor,
            if_guard,
            unless_guard,
            options_mapper,
            extra,
        ));
        index
    }
}

impl<C> fmt::Debug for Pipeline<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.steps.len())
            .field("error_callbacks", &self.error_callbacks.len())
            .field("current_step", &self.current_step)
            .finish_non_exhaustive()
    }
}

/// Builder for one step registration. Configure, then [`register`](Self::register).
pub struct StepBuilder<'p, C> {
    pipeline: &'p mut Pipeline<C>,
    argument: StepArgument<C>,
    label: Option<String>,
    constructor_name: Option<String>,
    inline: Option<Box<ConstructorFn<C>>>,
    if_guard: Option<Box<GuardFn<C>>>,
    unless_guard: Option<Box<GuardFn<C>>>,
    options_mapper: Option<Box<MapOptionsFn<C>>>,
    extra: BTreeMap<String, Value>,
    pending_error: Option<ConfigError>,
}

/// Option keys owned by the engine; rejected as user options.
const RESERVED_OPTION_KEYS: [&str; 4] = ["to_s", "if", "unless", "map_options"];

impl<'p, C: Clone + 'static> StepBuilder<'p, C> {
    /// Label used in logs and the status log. Defaults to the key for key
    /// arguments and to the step index otherwise.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Use the named constructor from the local table or shared registry.
    pub fn constructor(mut self, name: impl Into<String>) -> Self {
        self.constructor_name = Some(name.into());
        self
    }

    /// Use an inline callable as this step's constructor.
    pub fn construct_with<F>(mut self, callable: F) -> Self
    where
        F: Fn(&Step<C>, &C) -> Result<Option<C>, StepError> + 'static,
    {
        self.inline = Some(Box::new(callable));
        self
    }

    /// Run the step only when the guard returns true.
    pub fn guard_if<F>(mut self, guard: F) -> Self
    where
        F: Fn(&C, &Step<C>) -> bool + 'static,
    {
        self.if_guard = Some(Box::new(guard));
        self
    }

    /// Skip the step when the guard returns true. Evaluated before `if`.
    pub fn guard_unless<F>(mut self, guard: F) -> Self
    where
        F: Fn(&C, &Step<C>) -> bool + 'static,
    {
        self.unless_guard = Some(Box::new(guard));
        self
    }

    /// Compute per-invocation options from the change set, readable from
    /// guards and the constructor via `step.mapped_options()`.
    pub fn map_options<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&C) -> BTreeMap<String, Value> + 'static,
    {
        self.options_mapper = Some(Box::new(mapper));
        self
    }

    /// Attach a user option readable via `step.option(key)`.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if RESERVED_OPTION_KEYS.contains(&key.as_str()) {
            self.pending_error = Some(ConfigError::ReservedOptionKey { key });
            return self;
        }
        self.extra.insert(key, value.into());
        self
    }

    /// Resolve the constructor and append the step. Returns its index.
    pub fn register(self) -> Result<usize, ConfigError> {
        let Self {
            pipeline,
            argument,
            label,
            constructor_name,
            inline,
            if_guard,
            unless_guard,
            options_mapper,
            extra,
            pending_error,
        } = self;

        if let Some(error) = pending_error {
            return Err(error);
        }

        let kind = argument.kind();
        let raw_argument = argument.as_key().map(str::to_string);
        let label = label.unwrap_or_else(|| match argument.as_key() {
            Some(key) => key.to_string(),
            None => pipeline.steps.len().to_string(),
        });

        let constructor = match (constructor_name, inline) {
            (Some(name), Some(_)) => {
                return Err(ConfigError::AmbiguousConstructor { label, name });
            }
            (Some(name), None) => {
                pipeline
                    .lookup_constructor(&name)
                    .ok_or(ConfigError::UnresolvedConstructor { label: name })?
            }
            (None, Some(callable)) => Rc::new(Constructor::inline(callable)),
            (None, None) => pipeline.resolve_constructor(argument, &label)?,
        };

        Ok(pipeline.register_step(
            kind,
            label,
            raw_argument,
            constructor,
            if_guard,
            unless_guard,
            options_mapper,
            extra,
        ))
    }
}
