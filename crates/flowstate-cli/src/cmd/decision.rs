use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use flowstate_core::decision::DecisionLog;
use std::path::Path;

#[derive(Subcommand)]
pub enum DecisionSubcommand {
    /// Record a decision
    Add {
        /// Short title
        title: String,
        /// Why the decision was made
        #[arg(long)]
        rationale: Option<String>,
        /// Who made it
        #[arg(long = "by")]
        decided_by: Option<String>,
    },

    /// List recorded decisions
    List,
}

pub fn run(root: &Path, subcmd: DecisionSubcommand, json: bool) -> anyhow::Result<()> {
    let wf = super::open(root)?;
    match subcmd {
        DecisionSubcommand::Add {
            title,
            rationale,
            decided_by,
        } => {
            let decision = wf
                .record_decision(&title, rationale, decided_by)
                .context("failed to record decision")?;
            if json {
                return print_json(&decision);
            }
            println!("Recorded {}: {}", decision.id, decision.title);
        }
        DecisionSubcommand::List => {
            let log = DecisionLog::load(wf.store()).context("failed to read decision log")?;
            if json {
                return print_json(&log);
            }
            if log.decisions.is_empty() {
                println!("No decisions recorded.");
                return Ok(());
            }
            let rows = log
                .decisions
                .iter()
                .map(|d| {
                    vec![
                        d.id.clone(),
                        d.phase.clone().unwrap_or_else(|| "-".to_string()),
                        d.decided_by.clone().unwrap_or_else(|| "-".to_string()),
                        d.title.clone(),
                    ]
                })
                .collect();
            print_table(&["ID", "PHASE", "BY", "TITLE"], rows);
        }
    }
    Ok(())
}
