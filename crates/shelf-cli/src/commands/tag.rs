//! Tag command handlers

use anyhow::{Context, Result};

use shelf_core::{RecordStore, TagPatch};

use super::{confirm, resolve_tag_id};
use crate::output::Output;

/// Create a new tag
pub fn add(store: &mut RecordStore, name: String, output: &Output) -> Result<()> {
    let tag = store.create_tag(&name).context("Failed to create tag")?;
    output.success(&format!("Created tag: {} ({})", tag.name, tag.id));
    Ok(())
}

/// List all tags
pub fn list(store: &RecordStore, output: &Output) -> Result<()> {
    let tags = store.list_tags()?;
    output.print_tags(&tags);
    Ok(())
}

/// Rename a tag
pub fn rename(
    store: &mut RecordStore,
    name_or_id: String,
    new_name: String,
    output: &Output,
) -> Result<()> {
    let id = resolve_tag_id(store, &name_or_id)?;
    let tag = store
        .update_tag(
            id,
            TagPatch {
                name: Some(new_name),
            },
        )
        .context("Failed to rename tag")?;
    output.success(&format!("Renamed tag to: {}", tag.name));
    Ok(())
}

/// Delete a tag, detaching it from all resources
pub fn delete(store: &mut RecordStore, name_or_id: String, output: &Output) -> Result<()> {
    let id = resolve_tag_id(store, &name_or_id)?;
    let tag = store
        .get_tag(id)?
        .ok_or_else(|| anyhow::anyhow!("Tag not found: {}", name_or_id))?;

    if output.should_prompt() {
        println!(
            "Delete tag: {} (attached to {} resource(s))",
            tag.name,
            tag.resources.len()
        );
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store.delete_tag(id).context("Failed to delete tag")?;
    output.success(&format!("Deleted tag: {}", tag.name));
    Ok(())
}
