//! Split-archive acquisition: part discovery on mounted media, idempotent
//! staging, reassembly, and install-artifact resolution.
//!
//! The stack ships as `HakoStack.tar.aa`, `HakoStack.tar.ab`, … burned
//! across discs. Lexicographic file-name order is the concatenation order;
//! there is no manifest and no digest on the media.

pub mod sequencer;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AcquireConfig;
use crate::error::CoreError;
use crate::volume::VolumeScanner;

/// One `<base>.tar.<suffix>` file found on a mounted volume.
#[derive(Debug, Clone)]
pub struct ArchivePart {
    pub file_name: String,
    pub source_path: PathBuf,
    pub volume_name: String,
}

/// Stable directory under the system temp root where parts accumulate
/// across discs and re-runs. Left behind on failure so a retry resumes.
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure(&self) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.root.join(file_name).exists()
    }

    /// Staged part file names with the given prefix, sorted.
    pub fn staged_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries
                .flatten()
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|name| name.starts_with(prefix))
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    pub fn cleanup(&self) -> Result<(), CoreError> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

pub struct ArchiveAcquirer {
    scanner: Arc<VolumeScanner>,
    config: AcquireConfig,
    staging: StagingArea,
}

impl ArchiveAcquirer {
    pub fn new(scanner: Arc<VolumeScanner>, config: AcquireConfig) -> Self {
        let staging = StagingArea::new(config.staging_dir());
        Self {
            scanner,
            config,
            staging,
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Scan every mounted volume root for archive parts, sorted by file
    /// name. A volume that cannot be read is skipped, not fatal.
    pub fn find_parts(&self) -> Result<Vec<ArchivePart>, CoreError> {
        let prefix = self.config.part_prefix();
        let mut parts = Vec::new();

        for volume in self.scanner.list_volumes()? {
            let entries = match std::fs::read_dir(&volume.path) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!("[Acquire] skipping unreadable volume '{}': {}", volume.name, e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let file_name = entry.file_name().to_string_lossy().to_string();
                if file_name.starts_with(&prefix) && entry.path().is_file() {
                    parts.push(ArchivePart {
                        file_name,
                        source_path: entry.path(),
                        volume_name: volume.name.clone(),
                    });
                }
            }
        }

        parts.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(parts)
    }

    /// Copy every visible part into the staging area unless a file of the
    /// same name is already staged. Returns how many were actually copied,
    /// so re-running over the same disc reports 0.
    pub fn copy_missing_parts(&self) -> Result<usize, CoreError> {
        let parts = self.find_parts()?;
        self.staging.ensure()?;

        let mut copied = 0;
        for part in &parts {
            if self.staging.contains(&part.file_name) {
                tracing::debug!("[Acquire] '{}' already staged, skipping", part.file_name);
                continue;
            }
            let dest = self.staging.root().join(&part.file_name);
            std::fs::copy(&part.source_path, &dest)?;
            tracing::info!(
                "[Acquire] staged '{}' from volume '{}'",
                part.file_name,
                part.volume_name
            );
            copied += 1;
        }
        Ok(copied)
    }

    /// Concatenate the staged parts in sorted order and unpack the result,
    /// returning the extracted package path.
    ///
    /// The combined archive is written through a temp file and persisted in
    /// one step so a half-written `HakoStack.tar` is never observed by a
    /// retry. Parts are trusted as burned; the disc format carries no
    /// digests to verify against.
    pub fn reassemble(&self) -> Result<PathBuf, CoreError> {
        let prefix = self.config.part_prefix();
        let staged = self.staging.staged_with_prefix(&prefix);
        if staged.is_empty() {
            return Err(CoreError::NotFound("staged archive parts".to_string()));
        }
        self.staging.ensure()?;

        let tar_path = self.staging.root().join(self.config.archive_name());
        let mut combined = tempfile::NamedTempFile::new_in(self.staging.root())?;
        for name in &staged {
            let mut src = File::open(self.staging.root().join(name))?;
            std::io::copy(&mut src, combined.as_file_mut())?;
        }
        combined
            .persist(&tar_path)
            .map_err(|e| CoreError::Io(e.error))?;
        tracing::info!(
            "[Acquire] reassembled {} part(s) into '{}'",
            staged.len(),
            tar_path.display()
        );

        let mut archive = tar::Archive::new(File::open(&tar_path)?);
        archive.unpack(self.staging.root())?;

        let artifact = self.staging.root().join(self.config.artifact_name());
        if !artifact.exists() {
            return Err(CoreError::NotFound(format!(
                "'{}' inside the reassembled archive",
                self.config.artifact_name()
            )));
        }
        Ok(artifact)
    }

    /// Pick the package to install: the reassembled artifact when any
    /// parts are staged, otherwise the bundled fallback shipped with the
    /// application.
    pub fn resolve_install_artifact(&self) -> Result<PathBuf, CoreError> {
        let prefix = self.config.part_prefix();
        if !self.staging.staged_with_prefix(&prefix).is_empty() {
            return self.reassemble();
        }

        let bundled = self.config.bundled_artifact_path();
        if bundled.exists() {
            tracing::info!("[Acquire] no staged parts, using bundled '{}'", bundled.display());
            return Ok(bundled);
        }
        Err(CoreError::NotFound("install artifact".to_string()))
    }

    /// 설치 성공 후 스테이징 정리 — 실패해도 경고만 남깁니다.
    pub fn cleanup_staging(&self) {
        if let Err(e) = self.staging.cleanup() {
            tracing::warn!("[Acquire] staging cleanup failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::MockCommands;

    struct Fixture {
        _volumes_root: tempfile::TempDir,
        _staging_root: tempfile::TempDir,
        acquirer: ArchiveAcquirer,
        volumes_path: PathBuf,
    }

    fn fixture() -> Fixture {
        let volumes_root = tempfile::tempdir().unwrap();
        let staging_root = tempfile::tempdir().unwrap();
        let config = AcquireConfig {
            volumes_root: volumes_root.path().to_string_lossy().to_string(),
            staging_dir: Some(
                staging_root
                    .path()
                    .join("hako-install")
                    .to_string_lossy()
                    .to_string(),
            ),
            ..Default::default()
        };
        let scanner = Arc::new(VolumeScanner::new(
            Arc::new(MockCommands::new()),
            config.clone(),
        ));
        let volumes_path = volumes_root.path().to_path_buf();
        Fixture {
            _volumes_root: volumes_root,
            _staging_root: staging_root,
            acquirer: ArchiveAcquirer::new(scanner, config),
            volumes_path,
        }
    }

    fn add_disc(fixture: &Fixture, name: &str, parts: &[(&str, &[u8])]) -> PathBuf {
        let disc = fixture.volumes_path.join(name);
        std::fs::create_dir(&disc).unwrap();
        for (file_name, bytes) in parts {
            std::fs::write(disc.join(file_name), bytes).unwrap();
        }
        disc
    }

    /// HakoStack.pkg 하나를 담은 tar 바이트를 만들어 둘로 쪼갭니다.
    fn split_archive(payload: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "HakoStack.pkg", payload)
            .unwrap();
        let bytes = builder.into_inner().unwrap();
        let mid = bytes.len() / 2;
        (bytes[..mid].to_vec(), bytes[mid..].to_vec())
    }

    #[test]
    fn test_find_parts_sorted_across_volumes() {
        let f = fixture();
        add_disc(&f, "DISC_2", &[("HakoStack.tar.ab", b"b")]);
        add_disc(&f, "DISC_1", &[("HakoStack.tar.aa", b"a"), ("readme.txt", b"x")]);

        let parts = f.acquirer.find_parts().unwrap();
        let names: Vec<&str> = parts.iter().map(|p| p.file_name.as_str()).collect();
        assert_eq!(names, vec!["HakoStack.tar.aa", "HakoStack.tar.ab"]);
    }

    #[test]
    fn test_copy_missing_parts_is_idempotent() {
        let f = fixture();
        add_disc(
            &f,
            "DISC_1",
            &[("HakoStack.tar.aa", b"a"), ("HakoStack.tar.ab", b"b")],
        );

        assert_eq!(f.acquirer.copy_missing_parts().unwrap(), 2);
        assert_eq!(f.acquirer.copy_missing_parts().unwrap(), 0);

        let staged = f.acquirer.staging().staged_with_prefix("HakoStack.tar.");
        assert_eq!(staged, vec!["HakoStack.tar.aa", "HakoStack.tar.ab"]);
    }

    #[test]
    fn test_duplicate_part_name_staged_once() {
        let f = fixture();
        add_disc(&f, "DISC_A", &[("HakoStack.tar.aa", b"first")]);
        add_disc(&f, "DISC_B", &[("HakoStack.tar.aa", b"second")]);

        assert_eq!(f.acquirer.copy_missing_parts().unwrap(), 1);
        let content =
            std::fs::read(f.acquirer.staging().root().join("HakoStack.tar.aa")).unwrap();
        assert_eq!(content, b"first");
    }

    #[test]
    fn test_reassemble_concatenates_in_name_order() {
        let f = fixture();
        let payload = b"HAKO98-PKG-PAYLOAD";
        let (aa, ab) = split_archive(payload);
        // 일부러 뒤 파트를 먼저 스테이징
        add_disc(&f, "DISC_2", &[("HakoStack.tar.ab", &ab)]);
        add_disc(&f, "DISC_1", &[("HakoStack.tar.aa", &aa)]);
        f.acquirer.copy_missing_parts().unwrap();

        let artifact = f.acquirer.reassemble().unwrap();
        assert_eq!(artifact.file_name().unwrap(), "HakoStack.pkg");
        assert_eq!(std::fs::read(&artifact).unwrap(), payload);

        // 재조립된 tar는 파트 바이트를 이름순으로 이어붙인 것과 동일
        let tar_bytes =
            std::fs::read(f.acquirer.staging().root().join("HakoStack.tar")).unwrap();
        let mut expected = aa.clone();
        expected.extend_from_slice(&ab);
        assert_eq!(tar_bytes, expected);
    }

    #[test]
    fn test_reassemble_without_parts_is_not_found() {
        let f = fixture();
        let err = f.acquirer.reassemble().unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn test_resolve_prefers_reassembled_over_bundled() {
        let volumes_root = tempfile::tempdir().unwrap();
        let staging_root = tempfile::tempdir().unwrap();
        let bundled = staging_root.path().join("BundledStack.pkg");
        std::fs::write(&bundled, b"bundled").unwrap();

        let config = AcquireConfig {
            volumes_root: volumes_root.path().to_string_lossy().to_string(),
            staging_dir: Some(
                staging_root
                    .path()
                    .join("hako-install")
                    .to_string_lossy()
                    .to_string(),
            ),
            bundled_artifact: Some(bundled.to_string_lossy().to_string()),
            ..Default::default()
        };
        let scanner = Arc::new(VolumeScanner::new(
            Arc::new(MockCommands::new()),
            config.clone(),
        ));
        let acquirer = ArchiveAcquirer::new(scanner, config);

        let payload = b"payload";
        let (aa, ab) = split_archive(payload);
        let disc = volumes_root.path().join("DISC_1");
        std::fs::create_dir(&disc).unwrap();
        std::fs::write(disc.join("HakoStack.tar.aa"), &aa).unwrap();
        std::fs::write(disc.join("HakoStack.tar.ab"), &ab).unwrap();
        acquirer.copy_missing_parts().unwrap();

        let artifact = acquirer.resolve_install_artifact().unwrap();
        assert!(artifact.starts_with(acquirer.staging().root()));
        assert_ne!(artifact, bundled);
        assert_eq!(std::fs::read(&artifact).unwrap(), payload);
    }

    #[test]
    fn test_resolve_falls_back_to_bundled() {
        let volumes_root = tempfile::tempdir().unwrap();
        let staging_root = tempfile::tempdir().unwrap();
        let bundled = staging_root.path().join("HakoStack.pkg");
        std::fs::write(&bundled, b"bundled").unwrap();

        let config = AcquireConfig {
            volumes_root: volumes_root.path().to_string_lossy().to_string(),
            staging_dir: Some(
                staging_root
                    .path()
                    .join("hako-install")
                    .to_string_lossy()
                    .to_string(),
            ),
            bundled_artifact: Some(bundled.to_string_lossy().to_string()),
            ..Default::default()
        };
        let scanner = Arc::new(VolumeScanner::new(
            Arc::new(MockCommands::new()),
            config.clone(),
        ));
        let acquirer = ArchiveAcquirer::new(scanner, config);

        assert_eq!(acquirer.resolve_install_artifact().unwrap(), bundled);
    }

    #[test]
    fn test_resolve_with_nothing_is_not_found() {
        let f = fixture();
        let err = f.acquirer.resolve_install_artifact().unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn test_cleanup_staging() {
        let f = fixture();
        add_disc(&f, "DISC_1", &[("HakoStack.tar.aa", b"a")]);
        f.acquirer.copy_missing_parts().unwrap();
        assert!(f.acquirer.staging().root().exists());

        f.acquirer.cleanup_staging();
        assert!(!f.acquirer.staging().root().exists());
    }
}
