use crate::errors::{Error, Result};
use crate::interpolate::interpolate;
use crate::package_manager::PackageManager;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// A config is either a literal JSON value or a zero-argument producer of one,
/// evaluated on every read so time-sensitive values (e.g. `{NOW}`) stay fresh
/// across a long-lived plugin.
#[derive(Clone)]
pub enum Config {
    Literal(Value),
    Deferred(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl Config {
    pub fn literal(value: Value) -> Self {
        Config::Literal(value)
    }

    pub fn deferred(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Config::Deferred(Arc::new(f))
    }

    fn evaluate(&self) -> Value {
        match self {
            Config::Literal(value) => value.clone(),
            Config::Deferred(f) => f(),
        }
    }
}

/// Identifies an external tap or target program. Immutable once constructed,
/// except for the lazily-resolved `executable` cache.
pub struct Plugin {
    /// Installation locator, opaque to the core (e.g. a pip/git spec).
    pub spec: String,
    executable: Option<String>,
    resolved_executable: OnceLock<String>,
    config: Config,
    package_manager: Arc<dyn PackageManager>,
}

impl Plugin {
    pub fn new(spec: impl Into<String>, config: Config, package_manager: Arc<dyn PackageManager>) -> Self {
        Self {
            spec: spec.into(),
            executable: None,
            resolved_executable: OnceLock::new(),
            config,
            package_manager,
        }
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    /// The on-PATH executable name: the explicit name if one was given,
    /// otherwise derived from `spec` and cached after first resolution.
    pub fn executable(&self) -> &str {
        if let Some(name) = &self.executable {
            return name;
        }
        self.resolved_executable
            .get_or_init(|| self.package_manager.derive_name(&self.spec))
    }

    /// The resolved config: the literal or evaluated-thunk value, with every
    /// `{NAME}` placeholder in string leaves substituted from `interpolation`.
    /// Pass `None` to skip interpolation entirely (e.g. when no runner is
    /// wired up yet).
    pub fn config(&self, interpolation: Option<&BTreeMap<String, String>>) -> Value {
        let value = self.config.evaluate();
        match interpolation {
            Some(values) => interpolate(&value, values),
            None => value,
        }
    }

    /// 128-bit (32 hex character) fingerprint over `{executable, spec, config}`,
    /// stable across interpolation-free reads with identical inputs; used
    /// externally as a deterministic code-version identifier.
    pub fn hash_key(&self) -> String {
        let triple = serde_json::json!({
            "executable": self.executable(),
            "spec": self.spec,
            "config": self.config(None),
        });
        // `serde_json::Map` is a `BTreeMap` in this workspace's feature set (no
        // `preserve_order`), so this serialization is already key-sorted and
        // therefore canonical without extra work.
        let canonical = serde_json::to_string(&triple).expect("json values always serialize");
        format!("{:x}", md5::compute(canonical))
    }

    pub fn is_installed(&self) -> bool {
        self.package_manager.is_on_path(self.executable())
    }

    pub async fn ensure_installed(&self) -> Result<()> {
        if self.is_installed() {
            return Ok(());
        }
        self.package_manager
            .ensure_installed(self.executable(), &self.spec)
            .await
    }

    /// Spawns the executable synchronously with `args`, parsing its stdout as a
    /// single JSON document. Installs on first use if necessary.
    pub async fn run(&self, args: &[String]) -> Result<Value> {
        self.ensure_installed().await?;

        let mut cmd = async_process::Command::new(self.executable());
        cmd.args(args);
        let output = async_process::output(cmd).await?;

        if !output.status.success() {
            return Err(Error::DecodeError {
                executable: self.executable().to_string(),
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| Error::DecodeError {
            executable: self.executable().to_string(),
            message: format!("{e} at position {}", e.column()),
        })
    }
}
