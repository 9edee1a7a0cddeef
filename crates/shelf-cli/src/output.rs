//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use shelf_core::{Resource, SyncReport, Tag};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a single resource
    pub fn print_resource(&self, resource: &Resource, tag_names: &[String]) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", resource.id);
                println!("Title:    {}", resource.title);
                if !tag_names.is_empty() {
                    println!("Tags:     {}", tag_names.join(", "));
                }
                println!(
                    "Created:  {}",
                    resource.created_at.format("%Y-%m-%d %H:%M")
                );
                println!(
                    "Modified: {}",
                    resource.last_modified.format("%Y-%m-%d %H:%M")
                );
                if !resource.content.is_empty() {
                    println!();
                    println!("{}", resource.content);
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(resource).unwrap());
            }
            OutputFormat::Quiet => {
                println!("{}", resource.id);
            }
        }
    }

    /// Print a list of resources
    pub fn print_resources(&self, resources: &[Resource]) {
        match self.format {
            OutputFormat::Human => {
                if resources.is_empty() {
                    println!("No resources found.");
                    return;
                }
                for resource in resources {
                    let tags_indicator = if resource.tags.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", resource.tags.len())
                    };
                    println!(
                        "{} | {}{} | {}",
                        &resource.id.to_string()[..8],
                        truncate(&resource.title, 40),
                        tags_indicator,
                        truncate_line(&resource.content, 40)
                    );
                }
                println!("\n{} resource(s)", resources.len());
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(resources).unwrap());
            }
            OutputFormat::Quiet => {
                for resource in resources {
                    println!("{}", resource.id);
                }
            }
        }
    }

    /// Print a list of tags with usage counts
    pub fn print_tags(&self, tags: &[Tag]) {
        match self.format {
            OutputFormat::Human => {
                if tags.is_empty() {
                    println!("No tags found.");
                    return;
                }
                for tag in tags {
                    println!(
                        "{} | {} ({})",
                        &tag.id.to_string()[..8],
                        tag.name,
                        tag.resources.len()
                    );
                }
                println!("\n{} tag(s)", tags.len());
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(tags).unwrap());
            }
            OutputFormat::Quiet => {
                for tag in tags {
                    println!("{}", tag.name);
                }
            }
        }
    }

    /// Print the outcome of a sync cycle
    pub fn print_sync_report(&self, report: &SyncReport) {
        match self.format {
            OutputFormat::Human => {
                if *report == SyncReport::default() {
                    println!("✓ Already up to date");
                } else {
                    println!(
                        "✓ Sync complete: pushed {}, pulled {}, applied {}, stale {}",
                        report.pushed, report.pulled, report.applied, report.stale
                    );
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "pushed": report.pushed,
                        "pulled": report.pulled,
                        "applied": report.applied,
                        "stale": report.stale
                    })
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
    }

    #[test]
    fn test_truncate_line() {
        assert_eq!(truncate_line("single line", 20), "single line");
        assert_eq!(truncate_line("line one\nline two", 20), "line one");
        assert_eq!(
            truncate_line("very long single line here", 10),
            "very lo..."
        );
    }
}
