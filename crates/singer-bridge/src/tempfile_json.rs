use crate::errors::Result;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A JSON value written to a freshly created file under the OS temp directory.
/// The file is unlinked when the guard is dropped, on every exit path (normal
/// return, early `?`, or panic unwind) — there is no separate "close" step to
/// forget. Concurrent writers never share a path: `tempfile::NamedTempFile`
/// picks a unique name per call.
pub struct TempJsonFile {
    file: tempfile::NamedTempFile,
}

impl TempJsonFile {
    pub fn write<T: Serialize>(value: &T) -> Result<Self> {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile()?;
        file.write_all(serde_json::to_string(value)?.as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn path_buf(&self) -> PathBuf {
        self.file.path().to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_value_and_cleans_up_on_drop() {
        let value = json!({"a": 1});
        let path = {
            let guard = TempJsonFile::write(&value).unwrap();
            let path = guard.path_buf();
            assert!(path.exists());
            let contents = std::fs::read_to_string(&path).unwrap();
            assert_eq!(serde_json::from_str::<serde_json::Value>(&contents).unwrap(), value);
            path
        };
        assert!(!path.exists());
    }
}
