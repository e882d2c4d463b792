//! Snapshots of the critical state files.
//!
//! Layout:
//!   .flowstate/backups/backup-<timestamp>/manifest.json
//!   .flowstate/backups/backup-<timestamp>/<relative path of each file>
//!
//! A snapshot larger than `compress_threshold_bytes` is packed into
//! `backup-<timestamp>.tar.gz` (manifest included) and the directory is
//! removed. Verification recomputes every MD5 against the manifest.

use crate::config::BackupConfig;
use crate::error::{Error, Result};
use crate::io;
use crate::paths;
use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

const ARCHIVE_EXT: &str = ".tar.gz";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackupTrigger {
    Interval,
    Manual,
    FileChange { path: String },
    PhaseTransition,
}

impl fmt::Display for BackupTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupTrigger::Interval => f.write_str("interval"),
            BackupTrigger::Manual => f.write_str("manual"),
            BackupTrigger::FileChange { path } => write!(f, "file_change({path})"),
            BackupTrigger::PhaseTransition => f.write_str("phase_transition"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub trigger: BackupTrigger,
    pub files: Vec<String>,
    pub checksums: BTreeMap<String, String>,
    pub total_bytes: u64,
    pub compressed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub id: String,
    pub valid: bool,
    pub checked: usize,
    pub mismatched: Vec<String>,
    pub missing: Vec<String>,
}

pub struct BackupManager {
    root: PathBuf,
    dir: PathBuf,
    cfg: BackupConfig,
}

impl BackupManager {
    pub fn new(root: &Path, cfg: &BackupConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            dir: paths::backups_dir(root),
            cfg: cfg.clone(),
        }
    }

    fn dir_for(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    fn archive_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{ARCHIVE_EXT}"))
    }

    fn exists(&self, id: &str) -> bool {
        self.dir_for(id).exists() || self.archive_for(id).exists()
    }

    /// Decide whether `trigger` warrants a backup at `now`.
    pub fn should_backup(&self, trigger: &BackupTrigger, now: DateTime<Utc>) -> Result<bool> {
        match trigger {
            BackupTrigger::Interval | BackupTrigger::Manual => return Ok(true),
            BackupTrigger::FileChange { path } if self.cfg.is_critical(path) => return Ok(true),
            BackupTrigger::FileChange { .. } | BackupTrigger::PhaseTransition => {}
        }
        let newest = self.list()?.into_iter().next();
        Ok(match newest {
            None => true,
            Some(m) => now - m.timestamp >= Duration::minutes(i64::from(self.cfg.interval_minutes)),
        })
    }

    /// Snapshot every existing critical file, then apply retention.
    pub fn create(&self, trigger: BackupTrigger) -> Result<BackupManifest> {
        let now = Utc::now();
        let base = format!("backup-{}", io::file_timestamp(now));
        let mut id = base.clone();
        let mut n = 1;
        while self.exists(&id) {
            id = format!("{base}-{n}");
            n += 1;
        }

        let target = self.dir_for(&id);
        io::ensure_dir(&target)?;

        let mut files = Vec::new();
        let mut checksums = BTreeMap::new();
        let mut total_bytes = 0u64;
        for rel in &self.cfg.critical_files {
            let source = paths::state_file(&self.root, rel);
            if !source.is_file() {
                continue;
            }
            let data = std::fs::read(&source)?;
            io::atomic_write(&target.join(rel), &data)?;
            total_bytes += data.len() as u64;
            checksums.insert(rel.clone(), io::md5_hex(&data));
            files.push(rel.clone());
        }

        let compressed = total_bytes > self.cfg.compress_threshold_bytes;
        let manifest = BackupManifest {
            id: id.clone(),
            timestamp: now,
            trigger,
            files,
            checksums,
            total_bytes,
            compressed,
        };
        io::write_json(&target.join(paths::MANIFEST_FILE), &manifest)?;

        if compressed {
            self.compress(&id, &manifest)?;
            std::fs::remove_dir_all(&target)?;
        }
        tracing::info!(
            id = %id,
            trigger = %manifest.trigger,
            files = manifest.files.len(),
            compressed,
            "backup created"
        );

        let pruned = self.prune()?;
        if !pruned.is_empty() {
            tracing::debug!(count = pruned.len(), "pruned old backups");
        }
        Ok(manifest)
    }

    fn compress(&self, id: &str, manifest: &BackupManifest) -> Result<()> {
        let source = self.dir_for(id);
        let file = File::create(self.archive_for(id))?;
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        builder.append_path_with_name(source.join(paths::MANIFEST_FILE), paths::MANIFEST_FILE)?;
        for rel in &manifest.files {
            builder.append_path_with_name(source.join(rel), rel)?;
        }
        builder.into_inner()?.finish()?;
        Ok(())
    }

    /// Manifest plus the bytes of every file present in the backup.
    fn read_backup(&self, id: &str) -> Result<(BackupManifest, BTreeMap<String, Vec<u8>>)> {
        let dir = self.dir_for(id);
        if dir.is_dir() {
            let manifest: BackupManifest = serde_json::from_str(&std::fs::read_to_string(
                dir.join(paths::MANIFEST_FILE),
            )?)?;
            let mut contents = BTreeMap::new();
            for rel in &manifest.files {
                let path = dir.join(rel);
                if path.is_file() {
                    contents.insert(rel.clone(), std::fs::read(&path)?);
                }
            }
            return Ok((manifest, contents));
        }

        let archive_path = self.archive_for(id);
        if !archive_path.is_file() {
            return Err(Error::BackupNotFound(id.to_string()));
        }
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&archive_path)?));
        let mut entries = BTreeMap::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry
                .path()?
                .to_string_lossy()
                .trim_start_matches("./")
                .to_string();
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            entries.insert(name, buf);
        }
        let raw = entries
            .remove(paths::MANIFEST_FILE)
            .ok_or_else(|| Error::StateCorruption {
                file: format!("backups/{id}{ARCHIVE_EXT}"),
                reason: "archive has no manifest".to_string(),
            })?;
        let manifest: BackupManifest = serde_json::from_slice(&raw)?;
        Ok((manifest, entries))
    }

    /// All backups, newest first. Unreadable ones are skipped with a warning.
    pub fn list(&self) -> Result<Vec<BackupManifest>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut manifests = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            let id = name.strip_suffix(ARCHIVE_EXT).unwrap_or(&name);
            if !id.starts_with("backup-") {
                continue;
            }
            match self.read_backup(id) {
                Ok((manifest, _)) => manifests.push(manifest),
                Err(e) => tracing::warn!(backup = %id, error = %e, "skipping unreadable backup"),
            }
        }
        manifests.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(manifests)
    }

    pub fn verify(&self, id: &str) -> Result<VerifyReport> {
        let (manifest, contents) = self.read_backup(id)?;
        let mut mismatched = Vec::new();
        let mut missing = Vec::new();
        for rel in &manifest.files {
            match (contents.get(rel), manifest.checksums.get(rel)) {
                (Some(data), Some(expected)) if io::md5_hex(data) == *expected => {}
                (Some(_), _) => mismatched.push(rel.clone()),
                (None, _) => missing.push(rel.clone()),
            }
        }
        let valid = mismatched.is_empty() && missing.is_empty();
        if !valid {
            tracing::warn!(backup = %id, mismatched = mismatched.len(), missing = missing.len(), "backup failed verification");
        }
        Ok(VerifyReport {
            id: id.to_string(),
            valid,
            checked: manifest.files.len(),
            mismatched,
            missing,
        })
    }

    /// Delete the oldest backups beyond `max_backups`. Returns removed ids.
    pub fn prune(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for manifest in self.list()?.into_iter().skip(self.cfg.max_backups.max(1)) {
            let dir = self.dir_for(&manifest.id);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
            let archive = self.archive_for(&manifest.id);
            if archive.exists() {
                std::fs::remove_file(&archive)?;
            }
            removed.push(manifest.id);
        }
        Ok(removed)
    }

    /// Copy a verified backup's files back into the state directory.
    pub fn restore(&self, id: &str) -> Result<Vec<String>> {
        let report = self.verify(id)?;
        if !report.valid {
            return Err(Error::ChecksumMismatch(format!("backup {id}")));
        }
        let (manifest, contents) = self.read_backup(id)?;
        let mut restored = Vec::new();
        for rel in manifest.files {
            if let Some(data) = contents.get(&rel) {
                io::atomic_write(&paths::state_file(&self.root, &rel), data)?;
                restored.push(rel);
            }
        }
        tracing::info!(backup = %id, files = restored.len(), "backup restored");
        Ok(restored)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
