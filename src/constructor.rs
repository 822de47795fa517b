//! Constructors: the named units of work bound to steps.

use std::fmt;

use crate::error::StepError;
use crate::step::Step;

/// The callable a constructor wraps.
///
/// Returns `Ok(Some(next))` to advance the change set, `Ok(None)` to signal
/// a no-op (the step is marked skipped and the prior change set is kept),
/// or `Err` to fail the step.
pub type ConstructorFn<C> = dyn Fn(&Step<C>, &C) -> Result<Option<C>, StepError>;

/// Options recorded with a constructor at registration time.
#[derive(Debug, Clone, Default)]
pub struct ConstructorOptions {
    /// Fall back to this constructor for steps that resolve nothing else.
    /// At most one default per registry.
    pub default: bool,
}

/// A named, callable unit of work. Immutable after registration.
pub struct Constructor<C> {
    name: String,
    options: ConstructorOptions,
    callable: Box<ConstructorFn<C>>,
}

impl<C> Constructor<C> {
    pub fn new<F>(name: impl Into<String>, options: ConstructorOptions, callable: F) -> Self
    where
        F: Fn(&Step<C>, &C) -> Result<Option<C>, StepError> + 'static,
    {
        Self {
            name: name.into(),
            options,
            callable: Box::new(callable),
        }
    }

    /// An anonymous constructor for a step-local callable.
    pub fn inline(callable: Box<ConstructorFn<C>>) -> Self {
        Self {
            name: "inline".to_string(),
            options: ConstructorOptions::default(),
            callable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_default(&self) -> bool {
        self.options.default
    }

    /// Run the wrapped callable. Errors propagate untouched; recovery is
    /// the pipeline's concern.
    pub fn call(&self, step: &Step<C>, change_set: &C) -> Result<Option<C>, StepError> {
        (self.callable)(step, change_set)
    }
}

impl<C> fmt::Debug for Constructor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("name", &self.name)
            .field("default", &self.options.default)
            .finish_non_exhaustive()
    }
}
