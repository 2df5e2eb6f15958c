//! IaC binary installation into a per-version cache.

use crate::{Error, Result};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use terrakube_core::model::IacFlavor;
use tracing::{debug, info};

/// Installs and caches `terraform`/`tofu` executables under
/// `<home>/.terrakube/<flavor>-versions/<version>/`. Installs are idempotent;
/// concurrent requests for the same `(flavor, version)` serialize on a
/// per-key lock so extraction happens once.
pub struct VersionManager {
    cache_dir: PathBuf,
    http: reqwest::Client,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Default for VersionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionManager {
    pub fn new() -> Self {
        let home = home::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        Self::with_cache_dir(home.join(".terrakube"))
    }

    pub fn with_cache_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            http: reqwest::Client::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn install_dir(&self, flavor: IacFlavor, version: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}-versions", flavor.as_str()))
            .join(version)
    }

    /// Resolve the executable for `(version, flavor)`, downloading it on the
    /// first request. Invalid versions fail before any network I/O.
    pub async fn install(&self, version: &str, flavor: IacFlavor) -> Result<PathBuf> {
        let parsed = semver::Version::parse(version).map_err(|e| Error::VersionInvalid {
            flavor: flavor.as_str(),
            version: version.to_string(),
            reason: e.to_string(),
        })?;
        let version = parsed.to_string();

        let install_dir = self.install_dir(flavor, &version);
        let exec_path = install_dir.join(flavor.as_str());
        if exec_path.exists() {
            debug!(flavor = flavor.as_str(), %version, "binary already cached");
            return Ok(exec_path);
        }

        let lock = self.key_lock(&format!("{}-{version}", flavor.as_str()));
        let _guard = lock.lock().await;
        if exec_path.exists() {
            return Ok(exec_path);
        }

        info!(flavor = flavor.as_str(), %version, "installing IaC binary");

        let url = match flavor {
            IacFlavor::Terraform => format!(
                "https://releases.hashicorp.com/terraform/{version}/terraform_{version}_{}_{}.zip",
                release_os(),
                release_arch()
            ),
            IacFlavor::Tofu => format!(
                "https://github.com/opentofu/opentofu/releases/download/v{version}/tofu_{version}_{}_{}.zip",
                release_os(),
                release_arch()
            ),
        };

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::DownloadFailed(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::DownloadFailed(format!(
                "{url}: status {}",
                response.status()
            )));
        }
        let archive = response
            .bytes()
            .await
            .map_err(|e| Error::DownloadFailed(format!("{url}: {e}")))?;

        tokio::fs::create_dir_all(&install_dir).await?;
        zip::ZipArchive::new(Cursor::new(archive.as_ref()))
            .and_then(|mut zip| zip.extract(&install_dir))
            .map_err(|e| Error::ExtractFailed(format!("{url}: {e}")))?;

        if !exec_path.exists() {
            return Err(Error::ExtractFailed(format!(
                "{} missing after extraction",
                exec_path.display()
            )));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&exec_path, std::fs::Permissions::from_mode(0o755))?;
        }

        info!(flavor = flavor.as_str(), %version, path = %exec_path.display(), "installed");
        Ok(exec_path)
    }
}

fn release_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

fn release_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}
