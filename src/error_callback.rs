//! Error callbacks: typed recovery handlers.

use std::fmt;

use crate::error::{ErrorKind, StepError};
use crate::step::Step;
use crate::taxonomy::ErrorTaxonomy;

/// Handler invoked when a matching error is recovered.
///
/// The step is `None` when the failure preceded any step (e.g. in a
/// before-execution hook). The returned change set becomes the pipeline
/// result when recovery happens at the execution boundary; when recovery
/// continues the fold, it is discarded.
pub type ErrorHandlerFn<C> = dyn Fn(Option<&Step<C>>, &C, &StepError) -> C;

/// A registered recovery rule: which error kinds it matches, whether the
/// run halts after recovery, and the handler to invoke.
///
/// Never mutated after registration; matched by a first-fit scan in
/// registration order, regardless of specificity.
pub struct ErrorCallback<C> {
    match_kinds: Vec<ErrorKind>,
    halt_on_error: bool,
    handler: Box<ErrorHandlerFn<C>>,
}

impl<C> ErrorCallback<C> {
    pub fn new<F>(match_kinds: Vec<ErrorKind>, halt_on_error: bool, handler: F) -> Self
    where
        F: Fn(Option<&Step<C>>, &C, &StepError) -> C + 'static,
    {
        Self {
            match_kinds,
            halt_on_error,
            handler: Box::new(handler),
        }
    }

    /// Whether this callback handles `error`: true when the error kind's
    /// ancestor chain intersects the match set. An empty match set matches
    /// every error.
    pub fn applies_to(&self, error: &StepError, taxonomy: &ErrorTaxonomy) -> bool {
        if self.match_kinds.is_empty() {
            return true;
        }

        taxonomy
            .ancestors(error.kind())
            .iter()
            .any(|ancestor| self.match_kinds.contains(ancestor))
    }

    /// Whether the fold aborts after this callback recovers.
    pub fn halts(&self) -> bool {
        self.halt_on_error
    }

    pub fn invoke(&self, step: Option<&Step<C>>, change_set: &C, error: &StepError) -> C {
        (self.handler)(step, change_set, error)
    }
}

impl<C> fmt::Debug for ErrorCallback<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorCallback")
            .field("match_kinds", &self.match_kinds)
            .field("halt_on_error", &self.halt_on_error)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keep(_: Option<&Step<String>>, change_set: &String, _: &StepError) -> String {
        change_set.clone()
    }

    #[test]
    fn empty_match_set_matches_everything() {
        let callback: ErrorCallback<String> = ErrorCallback::new(Vec::new(), true, keep);
        let taxonomy = ErrorTaxonomy::new();

        assert!(callback.applies_to(&StepError::new("anything", "boom"), &taxonomy));
    }

    #[test]
    fn matches_through_the_taxonomy() {
        let callback: ErrorCallback<String> =
            ErrorCallback::new(vec![ErrorKind::new("custom_error")], true, keep);

        let mut taxonomy = ErrorTaxonomy::new();
        taxonomy.derive("other_custom_error", "custom_error");

        assert!(callback.applies_to(&StepError::new("custom_error", "boom"), &taxonomy));
        assert!(callback.applies_to(&StepError::new("other_custom_error", "boom"), &taxonomy));
        assert!(!callback.applies_to(&StepError::new("argument_error", "boom"), &taxonomy));
    }
}
