//! Stage trait and implementations.
//!
//! Stages are the units of work in a pipeline. Each has a validation step
//! (cheap, no side effects) and an execution step, and exposes a declarative
//! list of typed parameters.

mod context;
pub mod builtin;
mod factory;
mod parameters;
mod result;

pub use context::StageContext;
pub use factory::{FnStageFactory, StageConstructor, StageDescriptor, StageFactory};
pub use parameters::{Parameter, ParameterCategory, ParameterError, ParameterKind, ParameterSet};
pub use result::{StageError, StageResult};

use serde_json::Value;
use std::fmt::Debug;
use uuid::Uuid;

/// Trait for pipeline stages.
///
/// Implementors keep their parameter values in a [`ParameterSet`]; the
/// provided methods expose it generically so the sandbox rewriter and the
/// JSON reader can reach every path-valued parameter.
pub trait Stage: Send + Debug {
    /// Identity of this stage's class.
    fn descriptor(&self) -> &StageDescriptor;

    /// Current parameter values.
    fn parameter_set(&self) -> &ParameterSet;

    /// Mutable access to the parameter values.
    fn parameter_set_mut(&mut self) -> &mut ParameterSet;

    /// Checks parameters and inputs without side effects.
    fn validate(&mut self, ctx: &mut StageContext<'_>) -> StageResult;

    /// Performs the stage's work.
    ///
    /// Long-running stages should poll [`StageContext::is_cancelled`] and return
    /// early once it is set.
    fn execute(&mut self, ctx: &mut StageContext<'_>) -> StageResult;

    /// Registered class name.
    fn class_name(&self) -> &str {
        &self.descriptor().class_name
    }

    /// Registered uuid.
    fn uuid(&self) -> Uuid {
        self.descriptor().uuid
    }

    /// Parameter declarations in order.
    fn parameters(&self) -> &[Parameter] {
        self.parameter_set().parameters()
    }

    /// Reads one parameter value.
    fn parameter(&self, property: &str) -> Option<Value> {
        self.parameter_set().get(property).cloned()
    }

    /// Writes one parameter value after checking it against its declaration.
    fn set_parameter(&mut self, property: &str, value: Value) -> Result<(), ParameterError> {
        self.parameter_set_mut().set(property, value)
    }
}

/// Closure type used by [`FnStage`].
pub type StageFn = Box<dyn FnMut(&ParameterSet, &mut StageContext<'_>) -> StageResult + Send>;

/// A stage assembled from closures.
pub struct FnStage {
    descriptor: StageDescriptor,
    params: ParameterSet,
    validate: StageFn,
    execute: StageFn,
}

impl FnStage {
    /// Creates a stage that validates and executes successfully.
    #[must_use]
    pub fn new(descriptor: StageDescriptor, parameters: Vec<Parameter>) -> Self {
        Self {
            descriptor,
            params: ParameterSet::new(parameters),
            validate: Box::new(|_, _| Ok(())),
            execute: Box::new(|_, _| Ok(())),
        }
    }

    /// Creates a parameterless stage that does nothing.
    #[must_use]
    pub fn noop(descriptor: StageDescriptor) -> Self {
        Self::new(descriptor, Vec::new())
    }

    /// Replaces the validation step.
    #[must_use]
    pub fn on_validate<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ParameterSet, &mut StageContext<'_>) -> StageResult + Send + 'static,
    {
        self.validate = Box::new(f);
        self
    }

    /// Replaces the execution step.
    #[must_use]
    pub fn on_execute<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ParameterSet, &mut StageContext<'_>) -> StageResult + Send + 'static,
    {
        self.execute = Box::new(f);
        self
    }
}

impl Debug for FnStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("class_name", &self.descriptor.class_name)
            .finish_non_exhaustive()
    }
}

impl Stage for FnStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn parameter_set(&self) -> &ParameterSet {
        &self.params
    }

    fn parameter_set_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn validate(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        (self.validate)(&self.params, ctx)
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        (self.execute)(&self.params, ctx)
    }
}
