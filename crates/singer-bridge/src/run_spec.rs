use crate::errors::Result;
use crate::package_manager::{PackageManager, PipxPackageManager};
use crate::plugin::{Config, Plugin};
use crate::state::StateStore;
use crate::tap::Tap;
use crate::target::Target;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// The on-disk shape of a tap's or target's `PluginSpec`, as written by the
/// (out of scope) interactive front-end that materializes this file.
#[derive(Debug, Deserialize)]
pub struct PluginSpecDoc {
    pub spec: String,
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default)]
    pub config: Value,
}

/// A tap's `PluginSpec` plus the catalog wiring only taps carry: selection,
/// deselection, schema overrides and forced replication keys.
#[derive(Debug, Deserialize)]
pub struct TapSpecDoc {
    #[serde(flatten)]
    pub plugin: PluginSpecDoc,
    #[serde(default)]
    pub selected_streams: Option<Vec<String>>,
    #[serde(default)]
    pub deselected_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub schema_overrides: BTreeMap<String, Map<String, Value>>,
    #[serde(default)]
    pub replication_keys: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct StateSpecDoc {
    pub base_path: String,
}

/// The run-specification file the CLI binary reads: a tap, a target, and the
/// state backend they share. Not the "interactive front-end" the core's
/// Non-goals exclude — just the deterministic, one-shot input to a single run.
#[derive(Debug, Deserialize)]
pub struct RunSpecDoc {
    pub tap: TapSpecDoc,
    pub target: PluginSpecDoc,
    pub state: StateSpecDoc,
}

impl RunSpecDoc {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Wires the documented plugins and state backend into the live types the
    /// runner needs. Installation always goes through `pipx`, the core's one
    /// concrete `PackageManager`; tests construct taps and targets directly
    /// instead of going through this path so they can substitute a no-op one.
    pub fn build(self) -> Result<(Tap, Target, StateStore)> {
        let package_manager: Arc<dyn PackageManager> = Arc::new(PipxPackageManager);

        let mut tap = Tap::new(Self::plugin_from_doc(self.tap.plugin, package_manager.clone()));
        if let Some(streams) = self.tap.selected_streams {
            tap = tap.with_selected_streams(streams);
        }
        if let Some(patterns) = self.tap.deselected_patterns {
            tap = tap.with_deselected_patterns(patterns);
        }
        if !self.tap.schema_overrides.is_empty() {
            tap = tap.with_schema_overrides(self.tap.schema_overrides);
        }
        if !self.tap.replication_keys.is_empty() {
            tap = tap.with_replication_keys(self.tap.replication_keys);
        }

        let target = Target::new(Self::plugin_from_doc(self.target, package_manager));
        let state_store = StateStore::for_base_path(&self.state.base_path)?;

        Ok((tap, target, state_store))
    }

    fn plugin_from_doc(doc: PluginSpecDoc, package_manager: Arc<dyn PackageManager>) -> Plugin {
        let mut plugin = Plugin::new(doc.spec, Config::literal(doc.config), package_manager);
        if let Some(executable) = doc.executable {
            plugin = plugin.with_executable(executable);
        }
        plugin
    }
}
