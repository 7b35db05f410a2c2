//! Multi-disc sequencing: which discs are still missing, and the blocking
//! insert-prompt loop that walks a user through a disc set.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::acquire::{ArchiveAcquirer, ArchivePart};
use crate::config::AcquireConfig;
use crate::error::CoreError;
use crate::install::PrivilegedInstaller;
use crate::volume::VolumeScanner;

/// UI collaborator for the acquisition loop. `confirm_insert` blocks until
/// the user answers; `false` aborts the whole acquisition.
pub trait InsertPrompt: Send + Sync {
    fn confirm_insert(&self, disc: u32, total: u32) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDiscs {
    pub missing: Vec<u32>,
    pub total: u32,
}

pub struct DiscSequencer {
    scanner: Arc<VolumeScanner>,
    acquirer: Arc<ArchiveAcquirer>,
    installer: Arc<PrivilegedInstaller>,
    config: AcquireConfig,
}

impl DiscSequencer {
    pub fn new(
        scanner: Arc<VolumeScanner>,
        acquirer: Arc<ArchiveAcquirer>,
        installer: Arc<PrivilegedInstaller>,
        config: AcquireConfig,
    ) -> Self {
        Self {
            scanner,
            acquirer,
            installer,
            config,
        }
    }

    /// Which discs of the set are still missing. Recomputed from the
    /// mounted volumes on every call; nothing is cached.
    ///
    /// Discs declare themselves through `.disc_info` markers. When no
    /// marker declares a total but part files are visible, the set size
    /// is estimated from the distinct alphabetic part suffixes — two
    /// parts were burned per disc, so `ceil(suffixes / 2)`, minimum 1 —
    /// and disc 1 is assumed present (the estimate only ever runs with a
    /// disc mounted). Parts with out-of-scheme suffixes carry no suffix
    /// evidence but still count as visible media.
    pub fn compute_missing(&self) -> Result<MissingDiscs, CoreError> {
        let mut found: BTreeSet<u32> = BTreeSet::new();
        let mut total: u32 = 0;

        for volume in self.scanner.list_volumes()? {
            if let Some(info) = self.scanner.read_disc_info(&volume.path) {
                if let Some(n) = info.disc_number {
                    found.insert(n);
                }
                if let Some(t) = info.total_discs {
                    total = total.max(t);
                }
            }
        }

        if total == 0 {
            let parts = self.acquirer.find_parts()?;
            if parts.is_empty() {
                return Ok(MissingDiscs {
                    missing: Vec::new(),
                    total: 0,
                });
            }
            total = estimate_total_discs(self.distinct_part_suffixes(&parts)?.len());
            found.insert(1);
        }

        let missing = (1..=total).filter(|n| !found.contains(n)).collect();
        Ok(MissingDiscs { missing, total })
    }

    /// Walk the whole disc set, prompting for each missing disc in order.
    ///
    /// Disc 1 additionally stages the companion launcher bundle before any
    /// part copy; a staging failure there is a warning, not an abort. A
    /// declined prompt aborts with `UserDeclined`; a confirmed disc that
    /// still is not mounted after the settle delay aborts with `NotFound`.
    pub async fn drive_sequential_acquisition(
        &self,
        prompt: &dyn InsertPrompt,
    ) -> Result<(), CoreError> {
        let summary = self.compute_missing()?;
        tracing::info!(
            "[Sequencer] acquisition start: total={} missing={:?}",
            summary.total,
            summary.missing
        );

        if summary.total <= 1 {
            self.stage_companion_soft();
            self.acquirer.copy_missing_parts()?;
            return Ok(());
        }

        for disc in 1..=summary.total {
            let current = self.compute_missing()?;
            if current.missing.contains(&disc) {
                if !prompt.confirm_insert(disc, summary.total) {
                    return Err(CoreError::UserDeclined(format!(
                        "insert of disc {}",
                        disc
                    )));
                }
                // 마운트가 잡힐 때까지 잠깐 대기 후 재확인
                tokio::time::sleep(Duration::from_secs(self.config.mount_settle_secs)).await;
                let recheck = self.compute_missing()?;
                if recheck.missing.contains(&disc) {
                    return Err(CoreError::NotFound(format!(
                        "disc {} of {}",
                        disc, summary.total
                    )));
                }
            }

            if disc == 1 {
                self.stage_companion_soft();
            }
            self.acquirer.copy_missing_parts()?;
        }

        tracing::info!("[Sequencer] acquisition complete");
        Ok(())
    }

    fn stage_companion_soft(&self) {
        if let Err(e) = self.installer.stage_companion_bundle() {
            tracing::warn!("[Sequencer] companion bundle staging failed: {}", e);
        }
    }

    fn distinct_part_suffixes(&self, parts: &[ArchivePart]) -> Result<BTreeSet<String>, CoreError> {
        let pattern = format!(r"{}([a-z]+)", regex::escape(&self.config.part_prefix()));
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                return Err(CoreError::Internal(anyhow::anyhow!(
                    "bad part pattern: {}",
                    e
                )))
            }
        };

        let mut suffixes = BTreeSet::new();
        for part in parts {
            if let Some(caps) = re.captures(&part.file_name) {
                suffixes.insert(caps[1].to_string());
            }
        }
        Ok(suffixes)
    }
}

/// Legacy estimate: two part-files per burned disc.
fn estimate_total_discs(distinct_suffixes: usize) -> u32 {
    (((distinct_suffixes + 1) / 2) as u32).max(1)
}
