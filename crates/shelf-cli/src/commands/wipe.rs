//! Wipe command handler

use anyhow::Result;

use shelf_core::{EntityKind, RecordStore};

use super::confirm;
use crate::output::Output;

/// What a wipe should remove
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WipeTarget {
    Tags,
    Resources,
    All,
}

/// Delete every entity of the chosen kind(s)
///
/// Each deletion gets a tombstone and a change record, so the wipe
/// replicates like any other delete.
pub fn wipe(store: &mut RecordStore, target: WipeTarget, output: &Output) -> Result<()> {
    if output.should_prompt() {
        let what = match target {
            WipeTarget::Tags => "all tags",
            WipeTarget::Resources => "all resources",
            WipeTarget::All => "all tags and resources",
        };
        println!("This will delete {}.", what);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let mut removed = 0;
    if matches!(target, WipeTarget::Resources | WipeTarget::All) {
        removed += store.delete_all(EntityKind::Resource)?;
    }
    if matches!(target, WipeTarget::Tags | WipeTarget::All) {
        removed += store.delete_all(EntityKind::Tag)?;
    }

    output.success(&format!("Deleted {} entit(ies)", removed));
    Ok(())
}
