//! Callback registry: before/after hook lists and around chains.
//!
//! Callbacks are keyed by scope (`step` or `execution`) and phase. Hooks
//! run in registration order and thread the change set from one to the
//! next. Around callbacks nest outside-in in registration order: the
//! first-registered callback is the outermost, and each one decides
//! whether to run the rest of the chain by calling its continuation.

use crate::error::{PipelineError, StepError};

/// Hook callable for `before`/`after` phases. The returned change set is
/// what the next hook (and ultimately the caller) sees.
pub type HookFn<C> = dyn Fn(C) -> Result<C, StepError>;

/// Around callable. Receives the change set for its span and the
/// continuation for everything it wraps; not calling the continuation
/// silently skips the wrapped execution.
pub type AroundFn<C> = dyn for<'a> Fn(C, Continuation<'a, C>) -> Result<C, PipelineError<C>>;

/// Whether a callback wraps a single step or the whole execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Step,
    Execution,
}

/// Position of a hook relative to what it observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    After,
}

/// The rest of an around chain, ending in the wrapped body.
///
/// Consumed by calling it: each around callback can proceed at most once.
pub struct Continuation<'a, C> {
    rest: &'a [Box<AroundFn<C>>],
    body: &'a mut (dyn FnMut(C) -> Result<C, PipelineError<C>> + 'a),
}

impl<'a, C> Continuation<'a, C> {
    /// Run the remainder of the chain on `change_set`.
    pub fn call(self, change_set: C) -> Result<C, PipelineError<C>> {
        run_chain(self.rest, change_set, self.body)
    }
}

fn run_chain<'a, C>(
    chain: &'a [Box<AroundFn<C>>],
    change_set: C,
    body: &'a mut (dyn FnMut(C) -> Result<C, PipelineError<C>> + 'a),
) -> Result<C, PipelineError<C>> {
    match chain.split_first() {
        None => body(change_set),
        Some((outer, rest)) => outer(change_set, Continuation { rest, body }),
    }
}

/// Ordered callback storage for one pipeline.
pub struct Callbacks<C> {
    before_step: Vec<Box<HookFn<C>>>,
    after_step: Vec<Box<HookFn<C>>>,
    around_step: Vec<Box<AroundFn<C>>>,
    before_execution: Vec<Box<HookFn<C>>>,
    after_execution: Vec<Box<HookFn<C>>>,
    around_execution: Vec<Box<AroundFn<C>>>,
}

impl<C> Default for Callbacks<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Callbacks<C> {
    pub fn new() -> Self {
        Self {
            before_step: Vec::new(),
            after_step: Vec::new(),
            around_step: Vec::new(),
            before_execution: Vec::new(),
            after_execution: Vec::new(),
            around_execution: Vec::new(),
        }
    }

    /// Append a before/after hook. Registration order is execution order.
    pub fn register_hook<F>(&mut self, scope: Scope, phase: Phase, hook: F)
    where
        F: Fn(C) -> Result<C, StepError> + 'static,
    {
        self.hooks_mut(scope, phase).push(Box::new(hook));
    }

    /// Append an around callback. First registered ends up outermost.
    pub fn register_around<F>(&mut self, scope: Scope, callback: F)
    where
        F: for<'a> Fn(C, Continuation<'a, C>) -> Result<C, PipelineError<C>> + 'static,
    {
        self.arounds_mut(scope).push(Box::new(callback));
    }

    /// Fold the change set through the hooks of `(scope, phase)`.
    /// An empty list passes the change set through unchanged.
    pub fn run_hooks(&self, scope: Scope, phase: Phase, change_set: C) -> Result<C, StepError> {
        let mut change_set = change_set;
        for hook in self.hooks(scope, phase) {
            change_set = hook(change_set)?;
        }
        Ok(change_set)
    }

    /// Run `body` inside the around chain of `scope`. With no around
    /// callbacks registered the body runs directly.
    pub fn run_around<'a>(
        &'a self,
        scope: Scope,
        change_set: C,
        body: &'a mut (dyn FnMut(C) -> Result<C, PipelineError<C>> + 'a),
    ) -> Result<C, PipelineError<C>> {
        run_chain(self.arounds(scope), change_set, body)
    }

    fn hooks(&self, scope: Scope, phase: Phase) -> &[Box<HookFn<C>>] {
        match (scope, phase) {
            (Scope::Step, Phase::Before) => &self.before_step,
            (Scope::Step, Phase::After) => &self.after_step,
            (Scope::Execution, Phase::Before) => &self.before_execution,
            (Scope::Execution, Phase::After) => &self.after_execution,
        }
    }

    fn hooks_mut(&mut self, scope: Scope, phase: Phase) -> &mut Vec<Box<HookFn<C>>> {
        match (scope, phase) {
            (Scope::Step, Phase::Before) => &mut self.before_step,
            (Scope::Step, Phase::After) => &mut self.after_step,
            (Scope::Execution, Phase::Before) => &mut self.before_execution,
            (Scope::Execution, Phase::After) => &mut self.after_execution,
        }
    }

    fn arounds(&self, scope: Scope) -> &[Box<AroundFn<C>>] {
        match scope {
            Scope::Step => &self.around_step,
            Scope::Execution => &self.around_execution,
        }
    }

    fn arounds_mut(&mut self, scope: Scope) -> &mut Vec<Box<AroundFn<C>>> {
        match scope {
            Scope::Step => &mut self.around_step,
            Scope::Execution => &mut self.around_execution,
        }
    }
}
