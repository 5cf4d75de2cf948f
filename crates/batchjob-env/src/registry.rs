//! Registries of named execution environments.

use std::env;
use std::path::Path;
use std::path::PathBuf;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::ActivationError;

/// The name of the environment conda activates by default.
const BASE_ENVIRONMENT: &str = "base";

/// The directory whose presence marks a prefix as a materialized environment.
const CONDA_META_DIR: &str = "conda-meta";

/// The prefix of the active conda environment.
const CONDA_PREFIX_VAR: &str = "CONDA_PREFIX";
/// The name of the active conda environment.
const CONDA_DEFAULT_ENV_VAR: &str = "CONDA_DEFAULT_ENV";
/// The conda shell nesting level.
const CONDA_SHLVL_VAR: &str = "CONDA_SHLVL";

/// Environment variable listing additional environment directories.
const CONDA_ENVS_PATH_VAR: &str = "CONDA_ENVS_PATH";
/// Environment variable naming the conda installation root.
const CONDA_ROOT_VAR: &str = "CONDA_ROOT";

/// An activated environment.
///
/// An activation describes the changes to make to a payload's process
/// environment: variables to set and variables to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// The name the environment was requested by.
    name: String,
    /// The environment's prefix directory.
    prefix: PathBuf,
    /// The variables to set in the payload's environment.
    vars: IndexMap<String, String>,
    /// The variables to remove from the payload's environment.
    removed: Vec<String>,
}

impl Activation {
    /// Creates an activation that leaves the process environment untouched.
    pub fn new(name: impl Into<String>, prefix: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            vars: Default::default(),
            removed: Default::default(),
        }
    }

    /// Sets a variable in the payload's environment.
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Removes a variable from the payload's environment.
    pub fn with_removed(mut self, name: impl Into<String>) -> Self {
        self.removed.push(name.into());
        self
    }

    /// Gets the name the environment was requested by.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the environment's prefix directory.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Gets the variables to set in the payload's environment.
    pub fn vars(&self) -> &IndexMap<String, String> {
        &self.vars
    }

    /// Gets the variables to remove from the payload's environment.
    pub fn removed(&self) -> &[String] {
        &self.removed
    }
}

/// A registry of named execution environments.
///
/// Every successful call to [`activate`](Self::activate) must be paired with
/// exactly one call to [`deactivate`](Self::deactivate); use
/// [`activate`](crate::activate) to obtain a guard that does so.
pub trait EnvironmentRegistry: Send + Sync {
    /// Resolves an environment reference to its prefix directory.
    fn resolve(&self, name: &str) -> Result<PathBuf, ActivationError>;

    /// Activates the named environment.
    fn activate(&self, name: &str) -> Result<Activation, ActivationError>;

    /// Releases a previous activation.
    fn deactivate(&self, activation: &Activation);
}

/// Configuration of the environment registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields, default)]
pub struct EnvironmentConfig {
    /// The directories to search for named environments, in order.
    ///
    /// A leading `~` and environment variables are expanded. The directories
    /// listed in `CONDA_ENVS_PATH` and `$CONDA_ROOT/envs` are searched after
    /// these.
    pub envs_dirs: Vec<String>,
    /// The variables to remove from the payload's environment.
    ///
    /// Defaults to the state of the environment modules system, so that
    /// modules loaded in the submitting shell do not leak into the job.
    pub purge_vars: Vec<String>,
    /// Whether activation may nest inside an environment that is already
    /// active in the calling process.
    pub allow_nested: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            envs_dirs: vec!["~/.conda/envs".to_string()],
            purge_vars: vec!["LOADEDMODULES".to_string(), "_LMFILES_".to_string()],
            allow_nested: false,
        }
    }
}

/// A registry of conda environments.
///
/// A name resolves to `<dir>/<name>` for the first configured directory in
/// which it has been materialized; an absolute path is used as a prefix
/// directly. Only one environment may be active through the registry at a
/// time.
#[derive(Debug)]
pub struct CondaRegistry {
    /// The directories searched for named environments.
    envs_dirs: Vec<PathBuf>,
    /// The variables removed on activation.
    purge_vars: Vec<String>,
    /// Whether activation may nest inside an ambient environment.
    allow_nested: bool,
    /// The environment of the calling process.
    ambient: IndexMap<String, String>,
    /// The name of the environment currently activated by this registry.
    active: Mutex<Option<String>>,
}

impl CondaRegistry {
    /// Creates a registry searching the given directories.
    ///
    /// The ambient environment is read from the calling process.
    pub fn new(envs_dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            envs_dirs: envs_dirs.into_iter().collect(),
            purge_vars: Vec::new(),
            allow_nested: false,
            ambient: env::vars().collect(),
            active: Mutex::new(None),
        }
    }

    /// Creates a registry from configuration.
    ///
    /// Directories that fail to expand are skipped with a warning.
    pub fn from_config(config: &EnvironmentConfig) -> Self {
        let mut dirs = Vec::new();
        for dir in &config.envs_dirs {
            match shellexpand::full(dir) {
                Ok(expanded) => dirs.push(PathBuf::from(expanded.as_ref())),
                Err(e) => warn!("ignoring environment directory `{dir}`: {e}"),
            }
        }

        if let Some(paths) = env::var_os(CONDA_ENVS_PATH_VAR) {
            dirs.extend(env::split_paths(&paths).filter(|p| !p.as_os_str().is_empty()));
        }

        if let Some(root) = env::var_os(CONDA_ROOT_VAR) {
            dirs.push(Path::new(&root).join("envs"));
        }

        Self::new(dirs)
            .with_purged(config.purge_vars.iter().cloned())
            .with_nesting(config.allow_nested)
    }

    /// Sets the variables removed on activation.
    pub fn with_purged(mut self, vars: impl IntoIterator<Item = String>) -> Self {
        self.purge_vars = vars.into_iter().collect();
        self
    }

    /// Sets whether activation may nest inside an ambient environment.
    pub fn with_nesting(mut self, allow: bool) -> Self {
        self.allow_nested = allow;
        self
    }

    /// Replaces the ambient environment the registry activates on top of.
    pub fn with_ambient(
        mut self,
        vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.ambient = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Gets the directories searched for named environments.
    pub fn envs_dirs(&self) -> &[PathBuf] {
        &self.envs_dirs
    }

    /// Checks the ambient environment for an active environment other than
    /// the requested one.
    fn check_ambient(&self, name: &str, prefix: &Path) -> Result<(), ActivationError> {
        if self.allow_nested {
            return Ok(());
        }

        let Some(active) = self.ambient.get(CONDA_DEFAULT_ENV_VAR) else {
            return Ok(());
        };

        let same_prefix = self
            .ambient
            .get(CONDA_PREFIX_VAR)
            .is_some_and(|p| Path::new(p) == prefix);
        if active.is_empty() || active == BASE_ENVIRONMENT || active == name || same_prefix {
            return Ok(());
        }

        Err(ActivationError::ActivationConflict {
            requested: name.to_string(),
            active: active.clone(),
        })
    }
}

impl EnvironmentRegistry for CondaRegistry {
    fn resolve(&self, name: &str) -> Result<PathBuf, ActivationError> {
        let path = Path::new(name);
        let candidates: Vec<PathBuf> = if path.is_absolute() {
            vec![path.to_path_buf()]
        } else if name.is_empty() || path.components().count() != 1 {
            Vec::new()
        } else {
            self.envs_dirs.iter().map(|dir| dir.join(name)).collect()
        };

        for candidate in &candidates {
            if candidate.join(CONDA_META_DIR).is_dir() {
                debug!(
                    "resolved environment `{name}` to `{prefix}`",
                    prefix = candidate.display()
                );
                return Ok(candidate.clone());
            }
        }

        Err(ActivationError::EnvironmentNotFound {
            name: name.to_string(),
            searched: candidates,
        })
    }

    fn activate(&self, name: &str) -> Result<Activation, ActivationError> {
        let mut active = self.active.lock();
        if let Some(active) = active.as_ref() {
            return Err(ActivationError::ActivationConflict {
                requested: name.to_string(),
                active: active.clone(),
            });
        }

        let prefix = self.resolve(name)?;
        self.check_ambient(name, &prefix)?;

        let bin = prefix.join("bin");
        let path = match self.ambient.get("PATH") {
            Some(ambient) => env::join_paths(
                std::iter::once(bin.clone()).chain(env::split_paths(ambient)),
            ),
            None => env::join_paths([&bin]),
        }
        .map_err(|_| ActivationError::InvalidPrefix {
            prefix: prefix.clone(),
        })?;

        let mut activation = Activation::new(name, &prefix)
            .with_var(CONDA_PREFIX_VAR, prefix.to_string_lossy())
            .with_var(CONDA_DEFAULT_ENV_VAR, name)
            .with_var(CONDA_SHLVL_VAR, "1")
            .with_var("PATH", path.to_string_lossy());
        for var in &self.purge_vars {
            activation = activation.with_removed(var);
        }

        *active = Some(name.to_string());
        info!(
            "activated environment `{name}` at `{prefix}`",
            prefix = prefix.display()
        );
        Ok(activation)
    }

    fn deactivate(&self, activation: &Activation) {
        let mut active = self.active.lock();
        if active.as_deref() == Some(activation.name()) {
            *active = None;
            info!("deactivated environment `{name}`", name = activation.name());
        } else {
            warn!(
                "environment `{name}` is not active in this registry",
                name = activation.name()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    /// Creates a directory of environments with the given names.
    fn envs(names: &[&str]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::create_dir_all(dir.path().join(name).join(CONDA_META_DIR)).unwrap();
        }
        dir
    }

    /// Creates a registry over `dir` with a fixed ambient environment.
    fn registry(dir: &TempDir) -> CondaRegistry {
        CondaRegistry::new([dir.path().to_path_buf()])
            .with_purged(["LOADEDMODULES".to_string()])
            .with_ambient([("PATH", "/usr/bin:/bin"), ("LOADEDMODULES", "cuda/12")])
    }

    #[test]
    fn resolve_environments() {
        let dir = envs(&["cpsc577"]);
        fs::create_dir(dir.path().join("half-made")).unwrap();
        let registry = registry(&dir);

        assert_eq!(
            registry.resolve("cpsc577").unwrap(),
            dir.path().join("cpsc577")
        );

        let prefix = dir.path().join("cpsc577");
        assert_eq!(
            registry.resolve(prefix.to_str().unwrap()).unwrap(),
            prefix
        );

        match registry.resolve("half-made").unwrap_err() {
            ActivationError::EnvironmentNotFound { name, searched } => {
                assert_eq!(name, "half-made");
                assert_eq!(searched, [dir.path().join("half-made")]);
            }
            e => panic!("unexpected error: {e}"),
        }

        assert!(matches!(
            registry.resolve("../cpsc577"),
            Err(ActivationError::EnvironmentNotFound { .. })
        ));
        assert!(matches!(
            registry.resolve(""),
            Err(ActivationError::EnvironmentNotFound { .. })
        ));
    }

    #[test]
    fn activation_overlay() {
        let dir = envs(&["cpsc577"]);
        let registry = registry(&dir);
        let prefix = dir.path().join("cpsc577");

        let activation = registry.activate("cpsc577").unwrap();
        assert_eq!(activation.name(), "cpsc577");
        assert_eq!(activation.prefix(), prefix);
        assert_eq!(
            activation.vars().get(CONDA_PREFIX_VAR).map(String::as_str),
            prefix.to_str()
        );
        assert_eq!(
            activation.vars().get(CONDA_DEFAULT_ENV_VAR).map(String::as_str),
            Some("cpsc577")
        );
        assert_eq!(
            activation.vars().get(CONDA_SHLVL_VAR).map(String::as_str),
            Some("1")
        );

        #[cfg(unix)]
        assert_eq!(
            activation.vars()["PATH"],
            format!("{bin}:/usr/bin:/bin", bin = prefix.join("bin").display())
        );

        assert_eq!(activation.removed(), ["LOADEDMODULES"]);
        registry.deactivate(&activation);
    }

    #[test]
    fn unreleased_activation_conflicts() {
        let dir = envs(&["cpsc577", "other"]);
        let registry = registry(&dir);

        let activation = registry.activate("cpsc577").unwrap();
        assert_eq!(
            registry.activate("other").unwrap_err(),
            ActivationError::ActivationConflict {
                requested: "other".to_string(),
                active: "cpsc577".to_string(),
            }
        );

        registry.deactivate(&activation);
        let other = registry.activate("other").unwrap();
        registry.deactivate(&other);
    }

    #[test]
    fn ambient_environment_conflicts() {
        let dir = envs(&["cpsc577"]);
        let ambient = [
            ("PATH", "/usr/bin"),
            (CONDA_DEFAULT_ENV_VAR, "thesis"),
            (CONDA_PREFIX_VAR, "/home/me/.conda/envs/thesis"),
        ];

        let registry = registry(&dir).with_ambient(ambient);
        assert_eq!(
            registry.activate("cpsc577").unwrap_err(),
            ActivationError::ActivationConflict {
                requested: "cpsc577".to_string(),
                active: "thesis".to_string(),
            }
        );

        let registry = registry.with_nesting(true);
        let activation = registry.activate("cpsc577").unwrap();
        registry.deactivate(&activation);

        let registry = CondaRegistry::new([dir.path().to_path_buf()])
            .with_ambient([(CONDA_DEFAULT_ENV_VAR, BASE_ENVIRONMENT)]);
        let activation = registry.activate("cpsc577").unwrap();
        registry.deactivate(&activation);
    }

    #[test]
    fn config_defaults() {
        let config = EnvironmentConfig::default();
        assert_eq!(config.envs_dirs, ["~/.conda/envs"]);
        assert_eq!(config.purge_vars, ["LOADEDMODULES", "_LMFILES_"]);
        assert!(!config.allow_nested);

        let registry = CondaRegistry::from_config(&EnvironmentConfig {
            envs_dirs: vec!["/shared/envs".to_string()],
            ..Default::default()
        });
        assert_eq!(registry.envs_dirs()[0], Path::new("/shared/envs"));
    }
}
