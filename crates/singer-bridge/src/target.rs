use crate::errors::Result;
use crate::plugin::Plugin;
use crate::tempfile_json::TempJsonFile;
use std::collections::BTreeMap;
use std::process::Stdio;

/// A scoped target child process: its config temp file lives exactly as long as
/// this handle and is unlinked when it is dropped.
pub struct TargetHandle {
    pub child: async_process::Child,
    _config_file: TempJsonFile,
}

/// A loader: spawns the load process with stdin piped so the runner can stream
/// the tap's stdout into it (with a tee to the record counter along the way —
/// see `runner.rs`, which is why this doesn't take the tap's stdout directly).
pub struct Target {
    plugin: Plugin,
}

impl Target {
    pub fn new(plugin: Plugin) -> Self {
        Self { plugin }
    }

    pub fn executable(&self) -> &str {
        self.plugin.executable()
    }

    pub fn hash_key(&self) -> String {
        self.plugin.hash_key()
    }

    /// Spawns `executable --config <path>` with stdin, stdout and stderr all
    /// piped.
    pub async fn process(&self, interpolation: Option<&BTreeMap<String, String>>) -> Result<TargetHandle> {
        self.plugin.ensure_installed().await?;

        let config_file = TempJsonFile::write(&self.plugin.config(interpolation))?;

        let child: async_process::Child = async_process::Command::new(self.executable())
            .arg("--config")
            .arg(config_file.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?
            .into();

        Ok(TargetHandle {
            child,
            _config_file: config_file,
        })
    }
}
