//! Test utilities.

use std::path::PathBuf;

use parking_lot::Mutex;

use crate::Activation;
use crate::ActivationError;
use crate::EnvironmentRegistry;

/// A call made to a [`RecordingRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// An environment was activated.
    Activate(String),
    /// An environment was deactivated.
    Deactivate(String),
}

/// A registry of fixed environments that records every call made to it.
///
/// Activations leave the process environment untouched.
#[derive(Debug)]
pub struct RecordingRegistry {
    /// The names of the environments that exist.
    names: Vec<String>,
    /// The calls made so far.
    calls: Mutex<Vec<Call>>,
}

impl RecordingRegistry {
    /// Creates a registry with the given environments.
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            names: names.into_iter().map(str::to_string).collect(),
            calls: Default::default(),
        }
    }

    /// Gets the calls made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

impl EnvironmentRegistry for RecordingRegistry {
    fn resolve(&self, name: &str) -> Result<PathBuf, ActivationError> {
        if self.names.iter().any(|n| n == name) {
            return Ok(PathBuf::from("/envs").join(name));
        }

        Err(ActivationError::EnvironmentNotFound {
            name: name.to_string(),
            searched: vec![PathBuf::from("/envs").join(name)],
        })
    }

    fn activate(&self, name: &str) -> Result<Activation, ActivationError> {
        self.calls.lock().push(Call::Activate(name.to_string()));
        let prefix = self.resolve(name)?;
        Ok(Activation::new(name, prefix))
    }

    fn deactivate(&self, activation: &Activation) {
        self.calls
            .lock()
            .push(Call::Deactivate(activation.name().to_string()));
    }
}
