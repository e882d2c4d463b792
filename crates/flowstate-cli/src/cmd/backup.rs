use crate::output::{print_json, print_table, yes_no};
use anyhow::Context;
use clap::Subcommand;
use flowstate_core::backup::BackupTrigger;
use std::path::Path;

#[derive(Subcommand)]
pub enum BackupSubcommand {
    /// Back up the critical state files now
    Create,

    /// List backups, newest first
    List,

    /// Check a backup's files against its recorded checksums
    Verify {
        /// Backup ID (backup-...)
        id: String,
    },

    /// Remove backups beyond the retention limit
    Prune,
}

pub fn run(root: &Path, subcmd: BackupSubcommand, json: bool) -> anyhow::Result<()> {
    let wf = super::open(root)?;
    let backups = wf.backups();
    match subcmd {
        BackupSubcommand::Create => {
            let manifest = backups
                .create(BackupTrigger::Manual)
                .context("failed to create backup")?;
            if json {
                return print_json(&manifest);
            }
            println!(
                "Created backup {} ({} files, {} bytes{})",
                manifest.id,
                manifest.files.len(),
                manifest.total_bytes,
                if manifest.compressed { ", compressed" } else { "" }
            );
        }
        BackupSubcommand::List => {
            let manifests = backups.list().context("failed to list backups")?;
            if json {
                return print_json(&manifests);
            }
            if manifests.is_empty() {
                println!("No backups.");
                return Ok(());
            }
            let rows = manifests
                .iter()
                .map(|m| {
                    vec![
                        m.id.clone(),
                        m.trigger.to_string(),
                        m.files.len().to_string(),
                        m.total_bytes.to_string(),
                        yes_no(m.compressed),
                    ]
                })
                .collect();
            print_table(&["ID", "TRIGGER", "FILES", "BYTES", "COMPRESSED"], rows);
        }
        BackupSubcommand::Verify { id } => {
            let report = backups
                .verify(&id)
                .with_context(|| format!("failed to verify backup '{id}'"))?;
            if json {
                print_json(&report)?;
            } else {
                println!("{}: {} files checked", report.id, report.checked);
                for file in &report.mismatched {
                    println!("  checksum mismatch: {file}");
                }
                for file in &report.missing {
                    println!("  missing: {file}");
                }
            }
            if !report.valid {
                anyhow::bail!("backup '{id}' failed verification");
            }
            if !json {
                println!("Backup is intact.");
            }
        }
        BackupSubcommand::Prune => {
            let removed = backups.prune().context("failed to prune backups")?;
            if json {
                return print_json(&serde_json::json!({ "removed": removed }));
            }
            if removed.is_empty() {
                println!("Nothing to prune.");
            } else {
                for id in &removed {
                    println!("Removed {id}");
                }
            }
        }
    }
    Ok(())
}
