use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// How a stream's records are produced by the tap on subsequent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMethod {
    FullTable,
    Incremental,
    LogBased,
}

impl Default for ReplicationMethod {
    fn default() -> Self {
        ReplicationMethod::FullTable
    }
}

/// One `{breadcrumb, metadata}` record. The empty breadcrumb addresses the stream
/// itself; `["properties", name]` addresses a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub breadcrumb: Vec<String>,
    pub metadata: Map<String, Value>,
}

/// One table-like entity inside a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub tap_stream_id: String,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub replication_method: ReplicationMethod,
    #[serde(default)]
    pub replication_key: Option<String>,
    #[serde(default)]
    pub key_properties: Vec<String>,
    pub schema: Value,
    #[serde(default)]
    pub is_view: bool,
    #[serde(default)]
    pub metadata: Vec<MetadataRecord>,
}

impl Stream {
    /// `tap_stream_id` with dashes normalized to underscores, used by consumers
    /// that can't have dashes in identifiers (e.g. a target's destination table).
    pub fn safe_name(&self) -> String {
        self.tap_stream_id.replace('-', "_")
    }

    pub fn find_metadata(&self, breadcrumb: &[String]) -> Option<&Map<String, Value>> {
        self.metadata
            .iter()
            .find(|record| record.breadcrumb == breadcrumb)
            .map(|record| &record.metadata)
    }

    /// A stream is selected iff there is no stream-level metadata record, or that
    /// record's `selected` entry is absent or truthy.
    pub fn is_selected(&self) -> bool {
        match self.find_metadata(&[]) {
            None => true,
            Some(metadata) => match metadata.get("selected") {
                None => true,
                Some(value) => value.as_bool().unwrap_or(true),
            },
        }
    }

    /// Creates or merges the metadata record at `breadcrumb`. Merging overrides
    /// existing keys with the new ones and leaves the rest of the record intact.
    pub fn upsert_metadata(&mut self, breadcrumb: Vec<String>, fields: Map<String, Value>) {
        if let Some(record) = self
            .metadata
            .iter_mut()
            .find(|record| record.breadcrumb == breadcrumb)
        {
            record.metadata.extend(fields);
        } else {
            self.metadata.push(MetadataRecord {
                breadcrumb,
                metadata: fields,
            });
        }
    }

    /// Sets the top-level `selected` flag inside `schema`, creating the object if
    /// the schema document isn't already one.
    pub fn set_schema_selected(&mut self, selected: bool) {
        if !self.schema.is_object() {
            self.schema = Value::Object(Map::new());
        }
        self.schema["selected"] = Value::Bool(selected);
    }

    /// Mutable access to `schema.properties`, creating both levels if absent.
    pub fn schema_properties_mut(&mut self) -> &mut Map<String, Value> {
        if !self.schema.is_object() {
            self.schema = Value::Object(Map::new());
        }
        let schema = self.schema.as_object_mut().expect("schema is an object");
        if !schema.contains_key("properties") || !schema["properties"].is_object() {
            schema.insert("properties".to_string(), Value::Object(Map::new()));
        }
        schema["properties"].as_object_mut().expect("just inserted")
    }
}

/// An ordered sequence of streams, produced by tap discovery and rewritten by the
/// selection operators below. All operators are pure: they return a deep copy and
/// never mutate the receiver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub streams: Vec<Stream>,
}

fn selected_field(selected: bool) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("selected".to_string(), Value::Bool(selected));
    fields
}

impl Catalog {
    pub fn find_stream(&self, stream_id: &str) -> Option<&Stream> {
        self.streams.iter().find(|s| s.tap_stream_id == stream_id)
    }

    pub fn find_stream_mut(&mut self, stream_id: &str) -> Option<&mut Stream> {
        self.streams
            .iter_mut()
            .find(|s| s.tap_stream_id == stream_id)
    }

    /// Marks every stream whose `tap_stream_id` or `safe_name` appears in
    /// `streams` as selected, and every other stream as deselected. `None`
    /// leaves the catalog's selection metadata untouched.
    pub fn select(&self, streams: Option<&[String]>) -> Catalog {
        let mut catalog = self.clone();
        let Some(streams) = streams else {
            return catalog;
        };

        for stream in &mut catalog.streams {
            let is_selected =
                streams.contains(&stream.tap_stream_id) || streams.contains(&stream.safe_name());
            stream.upsert_metadata(Vec::new(), selected_field(is_selected));
            stream.set_schema_selected(is_selected);
        }

        catalog
    }

    /// Deselects streams or properties named by dotted `patterns`, e.g.
    /// `"users"` or `"users.email"`. Unknown streams are skipped silently.
    /// `None` leaves the catalog untouched.
    pub fn deselect(&self, patterns: Option<&[String]>) -> Catalog {
        let mut catalog = self.clone();
        let Some(patterns) = patterns else {
            return catalog;
        };

        for pattern in patterns {
            let mut nodes = pattern.split('.');
            let Some(stream_id) = nodes.next() else {
                continue;
            };
            let property_path: Vec<String> = nodes.map(str::to_string).collect();

            let Some(stream) = catalog.find_stream_mut(stream_id) else {
                continue;
            };

            if property_path.is_empty() {
                stream.upsert_metadata(Vec::new(), selected_field(false));
                stream.set_schema_selected(false);
            } else {
                let mut breadcrumb = vec!["properties".to_string()];
                breadcrumb.extend(property_path);
                stream.upsert_metadata(breadcrumb, selected_field(false));
            }
        }

        catalog
    }

    /// For each `stream_id -> key_name` entry, switches the stream to incremental
    /// replication keyed by `key_name`, and marks that property as automatically
    /// included.
    pub fn set_replication_keys(&self, mapping: &BTreeMap<String, String>) -> Catalog {
        let mut catalog = self.clone();

        for (stream_id, key_name) in mapping {
            let Some(stream) = catalog.find_stream_mut(stream_id) else {
                continue;
            };

            stream.replication_method = ReplicationMethod::Incremental;
            stream.replication_key = Some(key_name.clone());

            let mut valid_keys = Map::new();
            valid_keys.insert(
                "valid-replication-keys".to_string(),
                Value::Array(vec![Value::String(key_name.clone())]),
            );
            stream.upsert_metadata(Vec::new(), valid_keys);

            let mut inclusion = Map::new();
            inclusion.insert(
                "inclusion".to_string(),
                Value::String("automatic".to_string()),
            );
            stream.upsert_metadata(vec!["properties".to_string(), key_name.clone()], inclusion);
        }

        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stream(id: &str) -> Stream {
        Stream {
            tap_stream_id: id.to_string(),
            table_name: None,
            replication_method: ReplicationMethod::FullTable,
            replication_key: None,
            key_properties: vec!["id".to_string()],
            schema: json!({"properties": {"id": {"type": "integer"}}}),
            is_view: false,
            metadata: Vec::new(),
        }
    }

    fn two_stream_catalog() -> Catalog {
        Catalog {
            streams: vec![stream("animals"), stream("animals-two")],
        }
    }

    #[test]
    fn safe_name_replaces_dashes() {
        assert_eq!(stream("animals-two").safe_name(), "animals_two");
    }

    #[test]
    fn select_none_is_identity() {
        let catalog = two_stream_catalog();
        assert_eq!(catalog.select(None), catalog);
    }

    #[test]
    fn deselect_none_is_identity() {
        let catalog = two_stream_catalog();
        assert_eq!(catalog.deselect(None), catalog);
    }

    #[test]
    fn deselect_unknown_stream_is_noop() {
        let catalog = two_stream_catalog();
        let patterns = vec!["does-not-exist".to_string()];
        assert_eq!(catalog.deselect(Some(&patterns)), catalog);
    }

    #[test]
    fn select_marks_matching_streams_selected_and_others_deselected() {
        let catalog = two_stream_catalog();
        let selected = vec!["animals".to_string()];
        let result = catalog.select(Some(&selected));

        let animals = result.find_stream("animals").unwrap();
        assert!(animals.is_selected());
        assert_eq!(animals.schema["selected"], json!(true));

        let animals_two = result.find_stream("animals-two").unwrap();
        assert!(!animals_two.is_selected());
        assert_eq!(animals_two.schema["selected"], json!(false));
    }

    #[test]
    fn select_accepts_safe_name() {
        let catalog = two_stream_catalog();
        let selected = vec!["animals_two".to_string()];
        let result = catalog.select(Some(&selected));
        assert!(result.find_stream("animals-two").unwrap().is_selected());
        assert!(!result.find_stream("animals").unwrap().is_selected());
    }

    #[test]
    fn deselect_stream_sets_both_metadata_and_schema() {
        let catalog = two_stream_catalog();
        let patterns = vec!["animals-two".to_string()];
        let result = catalog.deselect(Some(&patterns));

        let animals_two = result.find_stream("animals-two").unwrap();
        assert!(!animals_two.is_selected());
        assert_eq!(animals_two.schema["selected"], json!(false));

        let animals = result.find_stream("animals").unwrap();
        assert!(animals.is_selected());
        assert!(animals.schema.get("selected").is_none());
    }

    #[test]
    fn deselect_property_leaves_stream_selection_untouched() {
        let catalog = two_stream_catalog();
        let patterns = vec!["animals.id".to_string()];
        let result = catalog.deselect(Some(&patterns));

        let animals = result.find_stream("animals").unwrap();
        assert!(animals.find_metadata(&[]).is_none());
        assert!(animals.schema.get("selected").is_none());

        let property_metadata = animals
            .find_metadata(&["properties".to_string(), "id".to_string()])
            .unwrap();
        assert_eq!(property_metadata["selected"], json!(false));
    }

    #[test]
    fn upsert_metadata_merges_existing_record() {
        let mut s = stream("animals");
        s.upsert_metadata(Vec::new(), selected_field(true));
        let mut extra = Map::new();
        extra.insert("inclusion".to_string(), json!("available"));
        s.upsert_metadata(Vec::new(), extra);

        assert_eq!(s.metadata.len(), 1);
        let metadata = s.find_metadata(&[]).unwrap();
        assert_eq!(metadata["selected"], json!(true));
        assert_eq!(metadata["inclusion"], json!("available"));
    }

    #[test]
    fn set_replication_keys_updates_method_key_and_property_metadata() {
        let catalog = two_stream_catalog();
        let mut mapping = BTreeMap::new();
        mapping.insert("animals".to_string(), "updated_at".to_string());

        let result = catalog.set_replication_keys(&mapping);
        let animals = result.find_stream("animals").unwrap();

        assert_eq!(animals.replication_method, ReplicationMethod::Incremental);
        assert_eq!(animals.replication_key.as_deref(), Some("updated_at"));

        let stream_metadata = animals.find_metadata(&[]).unwrap();
        assert_eq!(
            stream_metadata["valid-replication-keys"],
            json!(["updated_at"])
        );

        let property_metadata = animals
            .find_metadata(&["properties".to_string(), "updated_at".to_string()])
            .unwrap();
        assert_eq!(property_metadata["inclusion"], json!("automatic"));

        // untouched stream is unaffected
        let animals_two = result.find_stream("animals-two").unwrap();
        assert_eq!(animals_two.replication_method, ReplicationMethod::FullTable);
    }

    #[test]
    fn set_replication_keys_skips_unknown_stream() {
        let catalog = two_stream_catalog();
        let mut mapping = BTreeMap::new();
        mapping.insert("does-not-exist".to_string(), "key".to_string());
        assert_eq!(catalog.set_replication_keys(&mapping), catalog);
    }
}
