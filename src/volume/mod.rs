//! Mounted-volume enumeration and optical-media classification.
//!
//! The real product looks at `/Volumes` and asks `diskutil` about each
//! entry; simulated discs (disk images, test fixtures) are recognized by a
//! marker file when nothing classifies as optical hardware.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;

use crate::config::AcquireConfig;
use crate::error::CoreError;
use crate::platform::PlatformCommands;

/// 디스크 세트 식별용 마커 파일 (볼륨 루트, key=value 형식)
pub const DISC_INFO_FILE: &str = ".disc_info";

/// diskutil 출력에서 광학 미디어로 판단하는 키워드
const OPTICAL_KINDS: &[&str] = &["CD-ROM", "DVD", "Optical", "BD-ROM"];

#[derive(Debug, Clone, Serialize)]
pub struct Volume {
    pub name: String,
    pub path: PathBuf,
    pub is_optical: bool,
}

/// Parsed `.disc_info` marker. Hand-burned discs sometimes carry only one
/// of the two keys, so both are optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiscInfo {
    pub disc_number: Option<u32>,
    pub total_discs: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileCheck {
    pub exists: bool,
    pub path: PathBuf,
}

pub struct VolumeScanner {
    platform: Arc<dyn PlatformCommands>,
    config: AcquireConfig,
}

impl VolumeScanner {
    pub fn new(platform: Arc<dyn PlatformCommands>, config: AcquireConfig) -> Self {
        Self { platform, config }
    }

    pub fn volumes_root(&self) -> &str {
        &self.config.volumes_root
    }

    /// Enumerate mounted volumes, skipping dot-hidden entries and the
    /// system volume. An unreadable root surfaces as an error; callers
    /// render it as an empty list plus a message.
    pub fn list_volumes(&self) -> Result<Vec<Volume>, CoreError> {
        let root = Path::new(&self.config.volumes_root);
        let entries = std::fs::read_dir(root).map_err(|e| {
            CoreError::CommandFailed(format!(
                "cannot read volume root {}: {}",
                root.display(),
                e
            ))
        })?;

        let mut volumes = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || name == "Macintosh HD" {
                continue;
            }
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            volumes.push(Volume {
                name,
                path,
                is_optical: false,
            });
        }
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    /// Ask the disk utility about one volume. A failed query is
    /// inconclusive (`false`), not fatal.
    pub fn classify_optical(&self, volume: &Volume) -> bool {
        match self.platform.query_volume_metadata(&volume.path) {
            Ok(output) => is_optical_metadata(&output),
            Err(e) => {
                tracing::debug!(
                    "[Volume] metadata query inconclusive for '{}': {}",
                    volume.name,
                    e
                );
                false
            }
        }
    }

    /// Classify every mounted volume; when no real optical hardware shows
    /// up, fall back to treating marker-carrying volumes as discs so
    /// burned ISOs and mounted images keep working.
    pub fn detect_optical_volumes(&self) -> Result<Vec<Volume>, CoreError> {
        let mut volumes = self.list_volumes()?;
        for v in volumes.iter_mut() {
            v.is_optical = self.classify_optical(v);
        }

        let mut optical: Vec<Volume> = volumes.iter().filter(|v| v.is_optical).cloned().collect();

        if optical.is_empty() {
            // 하드웨어 판별이 전부 실패하면 마커 파일로 폴백
            for v in volumes.iter_mut() {
                if v.path.join(&self.config.marker_file).exists() {
                    v.is_optical = true;
                    optical.push(v.clone());
                }
            }
            if !optical.is_empty() {
                tracing::info!(
                    "[Volume] no optical hardware detected, {} volume(s) matched by marker file",
                    optical.len()
                );
            }
        }

        Ok(optical)
    }

    /// Presence check for a named file at a volume root.
    pub fn check_file(&self, volume_path: &Path, file_name: &str) -> FileCheck {
        let path = volume_path.join(file_name);
        FileCheck {
            exists: path.exists(),
            path,
        }
    }

    /// Read and parse the `.disc_info` marker of one volume.
    pub fn read_disc_info(&self, volume_path: &Path) -> Option<DiscInfo> {
        let content = std::fs::read_to_string(volume_path.join(DISC_INFO_FILE)).ok()?;
        parse_disc_info(&content)
    }
}

/// Substring classification over the disk utility's textual output.
/// Deliberately not a plist parse: this mirrors what the shipped product
/// has always matched on.
pub(crate) fn is_optical_metadata(output: &str) -> bool {
    if OPTICAL_KINDS.iter().any(|kind| output.contains(kind)) {
        return true;
    }
    if let Ok(re) = Regex::new(r"Protocol:\s*(.+)") {
        if let Some(caps) = re.captures(output) {
            let protocol = caps[1].trim();
            return protocol.contains("Optical") || protocol.contains("ATAPI");
        }
    }
    false
}

/// Tolerant `key=value` parse; returns None only when neither key is
/// present.
pub(crate) fn parse_disc_info(content: &str) -> Option<DiscInfo> {
    let number = Regex::new(r"disc_number=(\d+)")
        .ok()
        .and_then(|re| re.captures(content).and_then(|c| c[1].parse().ok()));
    let total = Regex::new(r"total_discs=(\d+)")
        .ok()
        .and_then(|re| re.captures(content).and_then(|c| c[1].parse().ok()));

    if number.is_none() && total.is_none() {
        return None;
    }
    Some(DiscInfo {
        disc_number: number,
        total_discs: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::MockCommands;

    fn scanner_for(root: &Path) -> VolumeScanner {
        let config = AcquireConfig {
            volumes_root: root.to_string_lossy().to_string(),
            ..Default::default()
        };
        VolumeScanner::new(Arc::new(MockCommands::new()), config)
    }

    #[test]
    fn test_parse_disc_info_full() {
        let info = parse_disc_info("disc_number=2\ntotal_discs=3\n").unwrap();
        assert_eq!(info.disc_number, Some(2));
        assert_eq!(info.total_discs, Some(3));
    }

    #[test]
    fn test_parse_disc_info_partial_and_garbage() {
        let only_number = parse_disc_info("disc_number=1").unwrap();
        assert_eq!(only_number.disc_number, Some(1));
        assert_eq!(only_number.total_discs, None);

        let only_total = parse_disc_info("junk\ntotal_discs=4").unwrap();
        assert_eq!(only_total.disc_number, None);
        assert_eq!(only_total.total_discs, Some(4));

        assert!(parse_disc_info("no keys here").is_none());
    }

    #[test]
    fn test_is_optical_metadata() {
        assert!(is_optical_metadata("   Optical Media Type: DVD-ROM\n"));
        assert!(is_optical_metadata("   Media Type: CD-ROM\n"));
        assert!(is_optical_metadata("   Protocol: ATAPI\n"));
        assert!(!is_optical_metadata("   Protocol: USB\n   Media Type: Generic\n"));
        assert!(!is_optical_metadata(""));
    }

    #[test]
    fn test_list_volumes_filters_hidden_and_system() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("HAKO_DISC_1")).unwrap();
        std::fs::create_dir(root.path().join("My Disc 2")).unwrap();
        std::fs::create_dir(root.path().join(".TimeMachine")).unwrap();
        std::fs::create_dir(root.path().join("Macintosh HD")).unwrap();
        std::fs::write(root.path().join("stray.txt"), "x").unwrap();

        let scanner = scanner_for(root.path());
        let volumes = scanner.list_volumes().unwrap();
        let names: Vec<&str> = volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["HAKO_DISC_1", "My Disc 2"]);
        assert!(volumes.iter().all(|v| !v.is_optical));
    }

    #[test]
    fn test_list_volumes_unreadable_root_is_error() {
        let scanner = scanner_for(Path::new("/nonexistent-volumes-root"));
        assert!(scanner.list_volumes().is_err());
    }

    #[test]
    fn test_detect_prefers_metadata_classification() {
        let root = tempfile::tempdir().unwrap();
        let disc = root.path().join("HAKO_DISC_1");
        let data = root.path().join("DataStick");
        std::fs::create_dir(&disc).unwrap();
        std::fs::create_dir(&data).unwrap();

        let platform = MockCommands::new()
            .with_metadata(&disc, "Media Type: DVD-ROM\nProtocol: ATAPI\n")
            .with_metadata(&data, "Protocol: USB\n");
        let config = AcquireConfig {
            volumes_root: root.path().to_string_lossy().to_string(),
            ..Default::default()
        };
        let scanner = VolumeScanner::new(Arc::new(platform), config);

        let optical = scanner.detect_optical_volumes().unwrap();
        assert_eq!(optical.len(), 1);
        assert_eq!(optical[0].name, "HAKO_DISC_1");
        assert!(optical[0].is_optical);
    }

    #[test]
    fn test_detect_falls_back_to_marker_file() {
        let root = tempfile::tempdir().unwrap();
        let disc = root.path().join("BURNED_ISO");
        let other = root.path().join("Other");
        std::fs::create_dir(&disc).unwrap();
        std::fs::create_dir(&other).unwrap();
        std::fs::write(disc.join("hako_dvd.png"), "png").unwrap();

        // 목에 메타데이터가 없으므로 모든 질의가 inconclusive — 마커 폴백 경로
        let scanner = scanner_for(root.path());
        let optical = scanner.detect_optical_volumes().unwrap();
        assert_eq!(optical.len(), 1);
        assert_eq!(optical[0].name, "BURNED_ISO");
    }

    #[test]
    fn test_check_file() {
        let root = tempfile::tempdir().unwrap();
        let disc = root.path().join("DISC");
        std::fs::create_dir(&disc).unwrap();
        std::fs::write(disc.join("hako_dvd.png"), "png").unwrap();

        let scanner = scanner_for(root.path());
        assert!(scanner.check_file(&disc, "hako_dvd.png").exists);
        assert!(!scanner.check_file(&disc, "missing.bin").exists);
    }

    #[test]
    fn test_read_disc_info_from_volume() {
        let root = tempfile::tempdir().unwrap();
        let disc = root.path().join("DISC");
        std::fs::create_dir(&disc).unwrap();
        std::fs::write(disc.join(DISC_INFO_FILE), "disc_number=1\ntotal_discs=2\n").unwrap();

        let scanner = scanner_for(root.path());
        let info = scanner.read_disc_info(&disc).unwrap();
        assert_eq!(info.disc_number, Some(1));
        assert_eq!(info.total_discs, Some(2));
        assert!(scanner.read_disc_info(&root.path().join("nope")).is_none());
    }
}
