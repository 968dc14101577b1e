//! Component registry for configuration-driven construction
//!
//! Each component kind has its own [`Registry`] mapping a type name to a
//! constructor. The set of valid names is enumerable, and an unknown name or
//! bad argument is a [`Error::Resolution`] raised at setup time; nothing is
//! ever substituted silently.

use crate::builtin;
use crate::traits::{DataSource, Loss, LrScheduler, Metric, Model, Optimizer};
use runtime_core::{ComponentSpec, Error, Result};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::debug;

/// Parameter name to element count, handed to optimizer constructors
pub type ParameterShapes = BTreeMap<String, usize>;

/// Constructor arguments of one component, tagged with the config section
/// they came from
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    section: &'a str,
    spec: &'a ComponentSpec,
}

impl<'a> Args<'a> {
    pub fn new(section: &'a str, spec: &'a ComponentSpec) -> Self {
        Self { section, spec }
    }

    pub fn section(&self) -> &str {
        self.section
    }

    pub fn type_name(&self) -> &str {
        &self.spec.type_name
    }

    /// Decode the arguments into a typed struct
    pub fn parse<A: DeserializeOwned>(&self) -> Result<A> {
        self.spec.parse_args(self.section)
    }
}

type Constructor<T, X> = Box<dyn Fn(Args<'_>, X) -> Result<Box<T>> + Send + Sync>;

/// Name to constructor table for one component kind.
///
/// `X` is the extra argument the pipeline supplies at construction time
/// (parameter shapes for optimizers, base learning rate for schedulers).
pub struct Registry<T: ?Sized, X = ()> {
    kind: &'static str,
    constructors: BTreeMap<String, Constructor<T, X>>,
}

impl<T: ?Sized, X> Registry<T, X> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            constructors: BTreeMap::new(),
        }
    }

    /// Register (or replace) a constructor under `name`
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(Args<'_>, X) -> Result<Box<T>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered type names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Construct the component described by `spec`
    pub fn construct(&self, section: &str, spec: &ComponentSpec, extra: X) -> Result<Box<T>> {
        let constructor = self.constructors.get(&spec.type_name).ok_or_else(|| {
            Error::resolution(
                section,
                format!(
                    "unknown {} type '{}' (registered: {})",
                    self.kind,
                    spec.type_name,
                    self.names().join(", ")
                ),
            )
        })?;

        debug!(kind = self.kind, section, type_name = %spec.type_name, "Constructing component");
        constructor(Args::new(section, spec), extra)
    }
}

/// One registry per component kind
pub struct ComponentRegistry {
    pub models: Registry<dyn Model>,
    pub data_sources: Registry<dyn DataSource>,
    pub losses: Registry<dyn Loss>,
    pub metrics: Registry<dyn Metric>,
    pub optimizers: Registry<dyn Optimizer, ParameterShapes>,
    pub schedulers: Registry<dyn LrScheduler, f64>,
}

impl ComponentRegistry {
    /// Registry with no entries
    pub fn empty() -> Self {
        Self {
            models: Registry::new("model"),
            data_sources: Registry::new("data source"),
            losses: Registry::new("loss"),
            metrics: Registry::new("metric"),
            optimizers: Registry::new("optimizer"),
            schedulers: Registry::new("lr scheduler"),
        }
    }

    /// Registry populated with the reference components
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        builtin::register_all(&mut registry);
        registry
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
