//! Resource command handlers

use anyhow::{Context, Result};
use uuid::Uuid;

use shelf_core::{query, Filter, RecordStore, ResourcePatch};

use super::{confirm, resolve_resource_id, resolve_tag_id};
use crate::output::Output;

/// Create a new resource
///
/// Tags are given by name; missing tags are created on the fly.
pub fn add(
    store: &mut RecordStore,
    title: String,
    content: Option<String>,
    tags: Vec<String>,
    output: &Output,
) -> Result<()> {
    let tag_ids = ensure_tags(store, &tags)?;

    let resource = store
        .create_resource(&title, content.as_deref().unwrap_or(""), &tag_ids)
        .context("Failed to create resource")?;

    output.success(&format!("Created resource: {}", resource.id));
    output.print_resource(&resource, &tags);
    Ok(())
}

/// List resources, optionally filtered by tag or recency
pub fn list(
    store: &RecordStore,
    tag: Option<String>,
    recent: bool,
    output: &Output,
) -> Result<()> {
    let resources = match tag {
        Some(ref name) => {
            let tag_id = resolve_tag_id(store, name)?;
            store.resources_with_tag(tag_id)?
        }
        None => store.list_resources()?,
    };

    let resources = if recent {
        query::apply(&Filter::recent(), &resources)
    } else {
        resources
    };

    output.print_resources(&resources);
    Ok(())
}

/// Show a single resource
pub fn show(store: &RecordStore, id: String, output: &Output) -> Result<()> {
    let uuid = resolve_resource_id(store, &id)?;
    let resource = store
        .get_resource(uuid)?
        .ok_or_else(|| anyhow::anyhow!("Resource not found: {}", id))?;

    let tag_names = tag_names(store, &resource.tags)?;
    output.print_resource(&resource, &tag_names);
    Ok(())
}

/// Edit a resource's title, content, or tags
pub fn edit(
    store: &mut RecordStore,
    id: String,
    title: Option<String>,
    content: Option<String>,
    tags: Option<Vec<String>>,
    output: &Output,
) -> Result<()> {
    let uuid = resolve_resource_id(store, &id)?;

    let tag_ids = match tags {
        Some(ref names) => Some(ensure_tags(store, names)?),
        None => None,
    };

    let resource = store
        .update_resource(
            uuid,
            ResourcePatch {
                title,
                content,
                tags: tag_ids,
            },
        )
        .context("Failed to update resource")?;

    output.success("Resource updated");
    let tag_names = tag_names(store, &resource.tags)?;
    output.print_resource(&resource, &tag_names);
    Ok(())
}

/// Delete a resource
pub fn delete(store: &mut RecordStore, id: String, output: &Output) -> Result<()> {
    let uuid = resolve_resource_id(store, &id)?;
    let resource = store
        .get_resource(uuid)?
        .ok_or_else(|| anyhow::anyhow!("Resource not found: {}", id))?;

    if output.should_prompt() {
        println!(
            "Delete resource: {} - {}",
            &resource.id.to_string()[..8],
            resource.title
        );
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store
        .delete_resource(uuid)
        .context("Failed to delete resource")?;
    output.success(&format!("Deleted resource: {}", uuid));
    Ok(())
}

/// Look up tags by name, creating any that don't exist yet
fn ensure_tags(store: &mut RecordStore, names: &[String]) -> Result<Vec<Uuid>> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let id = match store.tag_by_name(name)? {
            Some(tag) => tag.id,
            None => store.create_tag(name)?.id,
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn tag_names(store: &RecordStore, tag_ids: &[Uuid]) -> Result<Vec<String>> {
    let mut names = Vec::with_capacity(tag_ids.len());
    for tag_id in tag_ids {
        if let Some(tag) = store.get_tag(*tag_id)? {
            names.push(tag.name);
        }
    }
    Ok(names)
}
