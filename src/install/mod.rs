//! Privileged package installation and companion-launcher placement.
//!
//! The stack package goes through the macOS installer with an elevation
//! prompt; the retro launcher `.app` rides on disc 1 under `launcher/` and
//! is copied attribute-preserving into /Applications.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{AcquireConfig, InstallConfig};
use crate::error::CoreError;
use crate::platform::PlatformCommands;
use crate::volume::VolumeScanner;

pub struct PrivilegedInstaller {
    platform: Arc<dyn PlatformCommands>,
    scanner: Arc<VolumeScanner>,
    acquire: AcquireConfig,
    config: InstallConfig,
}

impl PrivilegedInstaller {
    pub fn new(
        platform: Arc<dyn PlatformCommands>,
        scanner: Arc<VolumeScanner>,
        acquire: AcquireConfig,
        config: InstallConfig,
    ) -> Self {
        Self {
            platform,
            scanner,
            acquire,
            config,
        }
    }

    /// Run the system package installer against the boot volume through
    /// the elevation prompt. A cancelled prompt surfaces as
    /// `UserDeclined`, anything else as a command failure with the
    /// installer's diagnostic.
    pub fn install_package(&self, artifact: &Path) -> Result<(), CoreError> {
        tracing::info!("[Install] installing package '{}'", artifact.display());
        // 경로는 셸 문자열 안에서 작은따옴표로 감싼다 (공백 있는 볼륨 이름 대비)
        let shell = format!("installer -pkg '{}' -target /", artifact.display());
        self.platform.run_privileged(&shell)?;
        tracing::info!("[Install] package installation finished");
        Ok(())
    }

    /// Locate `launcher/*.app` on a mounted disc and copy it into the
    /// launcher staging area, replacing whatever an earlier attempt left.
    pub fn stage_companion_bundle(&self) -> Result<PathBuf, CoreError> {
        let bundle = self.find_companion_on_discs()?;
        let staging = self.acquire.launcher_staging_dir();
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        std::fs::create_dir_all(&staging)?;

        let name = bundle
            .file_name()
            .ok_or_else(|| CoreError::NotFound("companion bundle name".to_string()))?;
        let dest = staging.join(name);
        self.platform.copy_bundle(&bundle, &dest)?;
        tracing::info!("[Install] staged companion bundle '{}'", dest.display());
        Ok(dest)
    }

    /// Copy the staged companion bundle into the applications directory,
    /// replacing an existing install, then drop the staging copy.
    pub fn install_companion(&self) -> Result<PathBuf, CoreError> {
        let staging = self.acquire.launcher_staging_dir();
        let staged = find_app_bundle(&staging)
            .ok_or_else(|| CoreError::NotFound("staged companion bundle".to_string()))?;
        let name = staged
            .file_name()
            .ok_or_else(|| CoreError::NotFound("companion bundle name".to_string()))?;

        let dest = Path::new(&self.config.applications_dir).join(name);
        if dest.exists() {
            std::fs::remove_dir_all(&dest)?;
        }
        self.platform.copy_bundle(&staged, &dest)?;
        tracing::info!("[Install] installed companion bundle to '{}'", dest.display());

        if let Err(e) = std::fs::remove_dir_all(&staging) {
            tracing::warn!("[Install] launcher staging cleanup failed: {}", e);
        }
        Ok(dest)
    }

    /// Open the installed launcher app (finish-screen action).
    pub fn launch_installed(&self) -> Result<(), CoreError> {
        let app = Path::new(&self.config.applications_dir).join(&self.config.companion_app);
        if !app.exists() {
            return Err(CoreError::NotFound(format!(
                "installed launcher at {}",
                app.display()
            )));
        }
        self.platform.open_application(&app)
    }

    fn find_companion_on_discs(&self) -> Result<PathBuf, CoreError> {
        for volume in self.scanner.list_volumes()? {
            let launcher_dir = volume.path.join("launcher");
            if let Some(bundle) = find_app_bundle(&launcher_dir) {
                tracing::info!(
                    "[Install] found companion bundle on volume '{}'",
                    volume.name
                );
                return Ok(bundle);
            }
        }
        Err(CoreError::NotFound("companion launcher bundle".to_string()))
    }
}

/// First `.app` directory inside `dir`, by name, if any.
fn find_app_bundle(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut bundles: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir() && p.extension().map(|ext| ext == "app").unwrap_or(false))
        .collect();
    bundles.sort();
    bundles.into_iter().next()
}
