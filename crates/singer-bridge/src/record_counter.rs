use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-stream RECORD tally, fed one line at a time from the tap's stdout capture
/// task. Cheaply clonable; all clones share the same counts, since the runner
/// hands one handle to the capture task and keeps another for the post-run
/// readout.
#[derive(Clone, Default)]
pub struct RecordCounter {
    counts: Arc<Mutex<HashMap<String, u64>>>,
}

impl RecordCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `line` as a Singer message and, if it is a RECORD for a named
    /// stream, increments that stream's count. Anything else — malformed JSON,
    /// a different message type, a missing stream name — is swallowed.
    pub async fn observe_line(&self, line: &str) {
        let Ok(serde_json::Value::Object(message)) = serde_json::from_str(line) else {
            return;
        };
        if message.get("type").and_then(|v| v.as_str()) != Some("RECORD") {
            return;
        }
        let Some(stream) = message.get("stream").and_then(|v| v.as_str()) else {
            return;
        };

        let mut counts = self.counts.lock().await;
        *counts.entry(stream.to_string()).or_insert(0) += 1;
    }

    pub async fn reset(&self) {
        self.counts.lock().await.clear();
    }

    pub async fn snapshot(&self) -> HashMap<String, u64> {
        self.counts.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_records_per_stream() {
        let counter = RecordCounter::new();
        counter
            .observe_line(r#"{"type": "RECORD", "stream": "animals", "record": {}}"#)
            .await;
        counter
            .observe_line(r#"{"type": "RECORD", "stream": "animals", "record": {}}"#)
            .await;
        counter
            .observe_line(r#"{"type": "RECORD", "stream": "plants", "record": {}}"#)
            .await;
        counter
            .observe_line(r#"{"type": "SCHEMA", "stream": "animals"}"#)
            .await;
        counter.observe_line("not json").await;

        let snapshot = counter.snapshot().await;
        assert_eq!(snapshot.get("animals"), Some(&2));
        assert_eq!(snapshot.get("plants"), Some(&1));
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn reset_clears_counts() {
        let counter = RecordCounter::new();
        counter
            .observe_line(r#"{"type": "RECORD", "stream": "animals"}"#)
            .await;
        counter.reset().await;
        assert!(counter.snapshot().await.is_empty());
    }
}
