use crate::catalog::Catalog;
use crate::errors::{Error, Result};
use crate::plugin::{Config, Plugin};
use crate::tempfile_json::TempJsonFile;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// A scoped tap child process: `config`, `catalog` and `state` temp files live
/// exactly as long as this handle, and are unlinked when it is dropped.
pub struct TapHandle {
    pub child: async_process::Child,
    _config_file: TempJsonFile,
    _catalog_file: TempJsonFile,
    _state_file: TempJsonFile,
}

/// An extractor: runs discovery, caches and filters its catalog, and spawns the
/// extraction process wired to a state file and a selected subset of streams.
pub struct Tap {
    plugin: Plugin,
    selected_streams: Option<Vec<String>>,
    deselected_patterns: Option<Vec<String>>,
    /// `{stream_id: {property_name: subschema}}`, merged into the discovered
    /// schema and marked `inclusion: "available"`.
    schema_overrides: BTreeMap<String, Map<String, Value>>,
    /// `{stream_id: replication_key}`, applied via `Catalog::set_replication_keys`
    /// before selection so a stream switched to incremental is still subject
    /// to the usual select/deselect rules.
    replication_keys: BTreeMap<String, String>,
    discovered: OnceCell<Catalog>,
}

impl Tap {
    pub fn new(plugin: Plugin) -> Self {
        Self {
            plugin,
            selected_streams: None,
            deselected_patterns: None,
            schema_overrides: BTreeMap::new(),
            replication_keys: BTreeMap::new(),
            discovered: OnceCell::new(),
        }
    }

    pub fn with_selected_streams(mut self, streams: Vec<String>) -> Self {
        self.selected_streams = Some(streams);
        self
    }

    pub fn with_deselected_patterns(mut self, patterns: Vec<String>) -> Self {
        self.deselected_patterns = Some(patterns);
        self
    }

    pub fn with_schema_overrides(mut self, overrides: BTreeMap<String, Map<String, Value>>) -> Self {
        self.schema_overrides = overrides;
        self
    }

    pub fn with_replication_keys(mut self, replication_keys: BTreeMap<String, String>) -> Self {
        self.replication_keys = replication_keys;
        self
    }

    pub fn executable(&self) -> &str {
        self.plugin.executable()
    }

    pub fn hash_key(&self) -> String {
        self.plugin.hash_key()
    }

    /// Runs `executable --config <path> --discover` and parses the resulting
    /// catalog document.
    pub async fn discover(&self, interpolation: Option<&BTreeMap<String, String>>) -> Result<Catalog> {
        let config_file = TempJsonFile::write(&self.plugin.config(interpolation))?;
        let raw = self
            .plugin
            .run(&[
                "--config".to_string(),
                config_file.path().display().to_string(),
                "--discover".to_string(),
            ])
            .await?;
        serde_json::from_value(raw).map_err(|e| Error::DecodeError {
            executable: self.executable().to_string(),
            message: format!("catalog document was not a valid catalog: {e}"),
        })
    }

    /// The cached, schema-augmented, selection-applied catalog for this tap.
    /// Discovery runs once and is reused for the lifetime of the tap.
    pub async fn catalog(&self, interpolation: Option<&BTreeMap<String, String>>) -> Result<&Catalog> {
        self.discovered
            .get_or_try_init(|| async {
                let mut catalog = self.discover(interpolation).await?;
                self.apply_schema_overrides(&mut catalog);
                let catalog = catalog
                    .set_replication_keys(&self.replication_keys)
                    .select(self.selected_streams.as_deref())
                    .deselect(self.deselected_patterns.as_deref());
                Ok(catalog)
            })
            .await
    }

    fn apply_schema_overrides(&self, catalog: &mut Catalog) {
        for (stream_id, properties) in &self.schema_overrides {
            let Some(stream) = catalog.find_stream_mut(stream_id) else {
                continue;
            };

            let schema_properties = stream.schema_properties_mut();
            for (name, subschema) in properties {
                schema_properties.insert(name.clone(), subschema.clone());
            }

            for name in properties.keys() {
                let mut inclusion = Map::new();
                inclusion.insert("inclusion".to_string(), Value::String("available".to_string()));
                stream.upsert_metadata(vec!["properties".to_string(), name.clone()], inclusion);
            }
        }
    }

    /// Spawns `executable --config C --catalog K --state S` with a catalog
    /// filtered to `streams` (`None` selects everything the tap itself
    /// selected at construction time). Both stdout and stderr are piped.
    pub async fn process(
        &self,
        state: &Value,
        streams: Option<&[String]>,
        interpolation: Option<&BTreeMap<String, String>>,
    ) -> Result<TapHandle> {
        let catalog = self.catalog(interpolation).await?;
        let filtered_catalog = catalog.select(streams);

        let config_file = TempJsonFile::write(&self.plugin.config(interpolation))?;
        let catalog_file = TempJsonFile::write(&filtered_catalog)?;
        let state_file = TempJsonFile::write(state)?;

        let child: async_process::Child = async_process::Command::new(self.executable())
            .arg("--config")
            .arg(config_file.path())
            .arg("--catalog")
            .arg(catalog_file.path())
            .arg("--state")
            .arg(state_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?
            .into();

        Ok(TapHandle {
            child,
            _config_file: config_file,
            _catalog_file: catalog_file,
            _state_file: state_file,
        })
    }
}

pub fn from_spec(
    spec: impl Into<String>,
    config: Value,
    package_manager: Arc<dyn crate::package_manager::PackageManager>,
) -> Tap {
    Tap::new(Plugin::new(spec, Config::literal(config), package_manager))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_manager::NoopPackageManager;
    use serde_json::json;

    fn fixture_path(name: &str) -> String {
        format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))
    }

    #[tokio::test]
    async fn discover_parses_catalog_from_fixture_tap() {
        let tap = Tap::new(
            Plugin::new(
                "unused-spec",
                Config::literal(json!({})),
                Arc::new(NoopPackageManager),
            )
            .with_executable(fixture_path("fake_tap.sh")),
        );

        let catalog = tap.discover(None).await.unwrap();
        assert!(catalog.find_stream("animals").is_some());
    }

    #[tokio::test]
    async fn catalog_applies_schema_overrides() {
        let mut overrides = BTreeMap::new();
        let mut extra_props = Map::new();
        extra_props.insert("region".to_string(), json!({"type": "string"}));
        overrides.insert("animals".to_string(), extra_props);

        let tap = Tap::new(
            Plugin::new(
                "unused-spec",
                Config::literal(json!({})),
                Arc::new(NoopPackageManager),
            )
            .with_executable(fixture_path("fake_tap.sh")),
        )
        .with_schema_overrides(overrides);

        let catalog = tap.catalog(None).await.unwrap();
        let animals = catalog.find_stream("animals").unwrap();
        assert!(animals.schema["properties"]["region"].is_object());
        let metadata = animals
            .find_metadata(&["properties".to_string(), "region".to_string()])
            .unwrap();
        assert_eq!(metadata["inclusion"], json!("available"));
    }

    #[tokio::test]
    async fn catalog_applies_replication_keys() {
        let mut replication_keys = BTreeMap::new();
        replication_keys.insert("animals".to_string(), "updated_at".to_string());

        let tap = Tap::new(
            Plugin::new(
                "unused-spec",
                Config::literal(json!({})),
                Arc::new(NoopPackageManager),
            )
            .with_executable(fixture_path("fake_tap.sh")),
        )
        .with_replication_keys(replication_keys);

        let catalog = tap.catalog(None).await.unwrap();
        let animals = catalog.find_stream("animals").unwrap();
        assert_eq!(
            animals.replication_method,
            crate::catalog::ReplicationMethod::Incremental
        );
        assert_eq!(animals.replication_key.as_deref(), Some("updated_at"));
    }
}
