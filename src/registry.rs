//! Constructor registries.
//!
//! A registry is a name→constructor table with at most one default entry.
//! Every pipeline owns a local one; a shared registry can additionally be
//! injected at construction and is consulted after the local table. There
//! is no ambient global registry; sharing is always an explicit instance.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::constructor::{Constructor, ConstructorOptions};
use crate::error::{ConfigError, StepError};
use crate::step::Step;

/// Name→constructor lookup table.
#[derive(Debug)]
pub struct ConstructorRegistry<C> {
    constructors: BTreeMap<String, Rc<Constructor<C>>>,
    default_name: Option<String>,
}

impl<C> Default for ConstructorRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ConstructorRegistry<C> {
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Register a constructor under `name`.
    ///
    /// Duplicate names are rejected; so is a second `default: true` entry.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        options: ConstructorOptions,
        callable: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&Step<C>, &C) -> Result<Option<C>, StepError> + 'static,
    {
        let name = name.into();
        if self.constructors.contains_key(&name) {
            return Err(ConfigError::DuplicateConstructor { name });
        }

        let default = options.default;
        if default && self.default_name.is_some() {
            return Err(ConfigError::DuplicateDefaultConstructor);
        }

        let constructor = Rc::new(Constructor::new(name.clone(), options, callable));
        self.constructors.insert(name.clone(), constructor);
        if default {
            self.default_name = Some(name);
        }

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Rc<Constructor<C>>> {
        self.constructors.get(name).cloned()
    }

    /// The constructor registered with `default: true`, if any.
    pub fn default_constructor(&self) -> Option<Rc<Constructor<C>>> {
        self.default_name.as_deref().and_then(|name| self.get(name))
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}
