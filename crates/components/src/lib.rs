//! Components - pluggable collaborators of the training pipeline
//!
//! Models, data sources, losses, metrics, optimizers and schedulers are
//! consumed through the traits in [`traits`] and constructed by name through
//! the [`ComponentRegistry`]. A minimal set of reference implementations is
//! registered by [`ComponentRegistry::with_builtins`].
//!
//! # Example
//!
//! ```
//! use components::ComponentRegistry;
//! use runtime_core::ComponentSpec;
//! use serde_json::json;
//!
//! let registry = ComponentRegistry::with_builtins();
//! let spec = ComponentSpec::new("Linear", json!({ "in_features": 3 }));
//! let model = registry.models.construct("arch", &spec, ()).unwrap();
//! assert_eq!(model.parameter_shapes()["weight"], 3);
//! ```

pub mod builtin;
pub mod registry;
pub mod traits;

pub use registry::{Args, ComponentRegistry, ParameterShapes, Registry};
pub use traits::{
    load_state_into, Batch, DataSource, LoadReport, Loss, LossOutput, LrScheduler, Metric, Model,
    Optimizer,
};
