use crate::errors::{Error, Result};
use async_trait::async_trait;

/// Installs and locates the executables backing a tap or target. This is an
/// external collaborator by design (see the Non-goals): the core only needs
/// `ensure_installed`/`is_on_path`/`derive_name`, not an opinion on how packages
/// actually get onto the host.
#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn ensure_installed(&self, executable: &str, spec: &str) -> Result<()>;

    fn is_on_path(&self, executable: &str) -> bool {
        std::env::var_os("PATH")
            .map(|path| {
                std::env::split_paths(&path).any(|dir| dir.join(executable).is_file())
            })
            .unwrap_or(false)
    }

    /// Derives an executable name from an installation spec when none is given
    /// explicitly, e.g. `"git+https://github.com/meltano/tap-smoke-test.git"`
    /// derives `"tap-smoke-test"`.
    fn derive_name(&self, spec: &str) -> String {
        let without_vcs_prefix = spec.split_once('+').map(|(_, rest)| rest).unwrap_or(spec);
        let last_segment = without_vcs_prefix
            .rsplit('/')
            .next()
            .unwrap_or(without_vcs_prefix);
        last_segment.strip_suffix(".git").unwrap_or(last_segment).to_string()
    }
}

/// Installs tap/target packages via `pipx`, the package manager the original
/// Python implementation this core was ported from uses.
pub struct PipxPackageManager;

#[async_trait]
impl PackageManager for PipxPackageManager {
    async fn ensure_installed(&self, executable: &str, spec: &str) -> Result<()> {
        if self.is_on_path(executable) {
            return Ok(());
        }

        let mut cmd = async_process::Command::new("pipx");
        cmd.arg("install").arg(spec);
        let output = async_process::output(cmd).await?;

        if !output.status.success() {
            return Err(Error::InstallError {
                executable: executable.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(())
    }
}

/// A package manager for already-installed executables (tests, containers that
/// bake in their own taps/targets). Never attempts to install anything; treats a
/// missing binary as an install failure rather than silently succeeding.
pub struct NoopPackageManager;

#[async_trait]
impl PackageManager for NoopPackageManager {
    async fn ensure_installed(&self, executable: &str, _spec: &str) -> Result<()> {
        if self.is_on_path(executable) {
            Ok(())
        } else {
            Err(Error::InstallError {
                executable: executable.to_string(),
                stderr: "no package manager configured and executable is not on PATH".to_string(),
            })
        }
    }
}
