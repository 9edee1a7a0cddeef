//! Command handlers

pub mod config;
pub mod resource;
pub mod status;
pub mod sync;
pub mod tag;
pub mod wipe;

use anyhow::{bail, Result};
use uuid::Uuid;

use shelf_core::RecordStore;

/// Ask the user for a yes/no confirmation
pub fn confirm(prompt: &str) -> Result<bool> {
    use std::io::{self, Write};

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Resolve a resource ID (full UUID or unique prefix)
pub fn resolve_resource_id(store: &RecordStore, id: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return Ok(uuid);
    }

    let resources = store.list_resources()?;
    let matches: Vec<_> = resources
        .iter()
        .filter(|r| r.id.to_string().starts_with(id))
        .collect();

    match matches.len() {
        0 => bail!("No resource found matching: {}", id),
        1 => Ok(matches[0].id),
        _ => {
            eprintln!("Multiple resources match '{}':", id);
            for resource in &matches {
                eprintln!("  {} - {}", resource.id, resource.title);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

/// Resolve a tag by name, full UUID, or unique id prefix
pub fn resolve_tag_id(store: &RecordStore, name_or_id: &str) -> Result<Uuid> {
    if let Some(tag) = store.tag_by_name(name_or_id)? {
        return Ok(tag.id);
    }
    if let Ok(uuid) = Uuid::parse_str(name_or_id) {
        return Ok(uuid);
    }

    let tags = store.list_tags()?;
    let matches: Vec<_> = tags
        .iter()
        .filter(|t| t.id.to_string().starts_with(name_or_id))
        .collect();

    match matches.len() {
        0 => bail!("No tag found matching: {}", name_or_id),
        1 => Ok(matches[0].id),
        _ => {
            eprintln!("Multiple tags match '{}':", name_or_id);
            for tag in &matches {
                eprintln!("  {} - {}", tag.id, tag.name);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}
