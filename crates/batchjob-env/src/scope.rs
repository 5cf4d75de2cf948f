//! Scoped activation of environments.

use tracing::debug;

use crate::Activation;
use crate::ActivationError;
use crate::EnvironmentRegistry;

/// An environment that stays active for the lifetime of the value.
///
/// The environment is deactivated exactly once when the value is dropped,
/// whether the scope ends normally, with an error, or by unwinding.
pub struct ScopedEnvironment<'a> {
    /// The registry the environment was activated through.
    registry: &'a dyn EnvironmentRegistry,
    /// The activation to release.
    activation: Activation,
}

impl ScopedEnvironment<'_> {
    /// Gets the activation of the environment.
    pub fn activation(&self) -> &Activation {
        &self.activation
    }

    /// Gets the name of the environment.
    pub fn name(&self) -> &str {
        self.activation.name()
    }

    /// Deactivates the environment now rather than at the end of the scope.
    pub fn release(self) {
        drop(self);
    }
}

impl std::fmt::Debug for ScopedEnvironment<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedEnvironment")
            .field("activation", &self.activation)
            .finish_non_exhaustive()
    }
}

impl Drop for ScopedEnvironment<'_> {
    fn drop(&mut self) {
        debug!("releasing environment `{name}`", name = self.activation.name());
        self.registry.deactivate(&self.activation);
    }
}

/// Activates a named environment for the lifetime of the returned guard.
///
/// If activation fails, nothing is left to release.
pub fn activate<'a>(
    registry: &'a dyn EnvironmentRegistry,
    name: &str,
) -> Result<ScopedEnvironment<'a>, ActivationError> {
    let activation = registry.activate(name)?;
    Ok(ScopedEnvironment {
        registry,
        activation,
    })
}
