//! Step logging.
//!
//! The engine records every completed step (success, skip, or failure)
//! through a single-method collaborator. The default sink keeps a
//! label→status map; custom sinks can derive whatever they need from the
//! step (its report, options, error).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::step::{Step, StepStatus};

/// Sink for completed steps. Called once per step per run, never for
/// execution-level callbacks.
pub trait StepLogger<C> {
    fn record(&mut self, step: &Step<C>);
}

/// Default logger: accumulates step label → final status.
///
/// Labels are keys, so two steps sharing a label keep the last status
/// written.
#[derive(Debug, Clone, Default)]
pub struct StatusLog {
    entries: BTreeMap<String, StepStatus>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, label: &str) -> Option<StepStatus> {
        self.entries.get(label).copied()
    }

    pub fn entries(&self) -> &BTreeMap<String, StepStatus> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> StepLogger<C> for StatusLog {
    fn record(&mut self, step: &Step<C>) {
        self.entries.insert(step.label().to_string(), step.status());
    }
}

/// Lets a shared handle act as the pipeline's logger, so callers can keep
/// a reading side while the pipeline owns the recording side.
impl<C, L: StepLogger<C>> StepLogger<C> for Rc<RefCell<L>> {
    fn record(&mut self, step: &Step<C>) {
        self.borrow_mut().record(step);
    }
}
