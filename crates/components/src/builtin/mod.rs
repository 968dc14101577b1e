//! Reference components registered by [`ComponentRegistry::with_builtins`]
//!
//! These are deliberately small: enough to drive the pipeline end to end on
//! a synthetic regression task.
//!
//! [`ComponentRegistry::with_builtins`]: crate::ComponentRegistry::with_builtins

pub mod linear;
pub mod loss;
pub mod metric;
pub mod optim;
pub mod scheduler;
pub mod synthetic;

use crate::ComponentRegistry;

pub(crate) fn register_all(registry: &mut ComponentRegistry) {
    registry.models.register("Linear", linear::Linear::from_args);

    registry
        .data_sources
        .register("SyntheticRegression", synthetic::SyntheticRegression::from_args);

    registry
        .losses
        .register("MseLoss", loss::MseLoss::from_args)
        .register("L1Loss", loss::L1Loss::from_args);

    registry
        .metrics
        .register("MeanSquaredError", metric::MeanSquaredError::from_args)
        .register("MeanAbsoluteError", metric::MeanAbsoluteError::from_args);

    registry
        .optimizers
        .register("Sgd", optim::Sgd::from_args)
        .register("Adam", optim::Adam::from_args);

    registry
        .schedulers
        .register("StepLr", scheduler::StepLr::from_args)
        .register("ConstantLr", scheduler::ConstantLr::from_args);
}
