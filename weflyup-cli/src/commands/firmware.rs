//! Auto-discovery and interactive selection of firmware archives.
//!
//! When the user gives neither an archive nor image paths to `update`, this
//! module searches the working directory tree for `.rar` archives and
//! presents an interactive selection if multiple candidates are found.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};
use rust_i18n::t;

use crate::{CliError, use_fancy_output};

/// Maximum directory depth when searching for archives.
const MAX_SEARCH_DEPTH: usize = 3;

/// Directories to skip during search.
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".svn", ".hg"];

/// A discovered firmware archive.
#[derive(Debug, Clone)]
pub struct ArchiveCandidate {
    /// Full path to the archive.
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: Option<SystemTime>,
}

impl ArchiveCandidate {
    /// Format file size in a human-readable way.
    pub fn human_size(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = 1024 * 1024;
        #[allow(clippy::cast_precision_loss)]
        if self.size >= MB {
            format!("{:.1} MB", self.size as f64 / MB as f64)
        } else if self.size >= KB {
            format!("{:.1} KB", self.size as f64 / KB as f64)
        } else {
            format!("{} B", self.size)
        }
    }

    /// Format the display label for interactive selection.
    pub fn display_label(&self, base: &Path) -> String {
        let rel = self.path.strip_prefix(base).unwrap_or(&self.path).display();
        format!("{rel} ({})", self.human_size())
    }
}

/// Search for `.rar` files under `base_dir` up to `MAX_SEARCH_DEPTH`.
///
/// Newest archives come first.
pub fn find_archives(base_dir: &Path) -> Vec<ArchiveCandidate> {
    let mut candidates = Vec::new();
    walk_dir(base_dir, 0, &mut candidates);

    candidates.sort_by(|a, b| {
        let newest_first = match (&b.modified, &a.modified) {
            (Some(bm), Some(am)) => bm.cmp(am),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        newest_first.then_with(|| a.path.cmp(&b.path))
    });

    candidates
}

fn walk_dir(dir: &Path, depth: usize, out: &mut Vec<ArchiveCandidate>) {
    if depth > MAX_SEARCH_DEPTH {
        return;
    }

    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if name_str.starts_with('.') || SKIP_DIRS.contains(&name_str.as_ref()) {
                continue;
            }
            walk_dir(&path, depth + 1, out);
        } else if crate::archive::is_rar(&path) {
            let meta = entry.metadata().ok();
            let size = meta.as_ref().map_or(0, std::fs::Metadata::len);
            let modified = meta.and_then(|m| m.modified().ok());
            out.push(ArchiveCandidate {
                path,
                size,
                modified,
            });
        }
    }
}

/// Resolve the archive to install: the given one, or one found under `base`.
///
/// # Errors
///
/// Returns error when:
/// - No archive specified and none found in the directory tree
/// - Non-interactive mode and multiple candidates found
/// - User cancels interactive selection
pub fn resolve_archive(
    archive: Option<&PathBuf>,
    base: &Path,
    non_interactive: bool,
    quiet: bool,
) -> Result<PathBuf> {
    if let Some(path) = archive {
        return Ok(path.clone());
    }

    let candidates = find_archives(base);

    let Some(first) = candidates.first() else {
        return Err(CliError::Usage(t!("update.no_archive_found").to_string()).into());
    };

    if candidates.len() == 1 {
        let rel = first
            .path
            .strip_prefix(base)
            .unwrap_or(&first.path)
            .display()
            .to_string();

        if !quiet {
            eprintln!(
                "{} {}",
                style("📦").cyan(),
                t!(
                    "update.auto_found_one",
                    path = &rel,
                    size = first.human_size()
                )
            );
        }

        if non_interactive {
            return Ok(first.path.clone());
        }

        let confirm = dialoguer::Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(t!("update.confirm_archive", path = &rel).to_string())
            .default(true)
            .interact()
            .context("archive confirmation failed")?;

        if confirm {
            return Ok(first.path.clone());
        }
        return Err(CliError::Cancelled(t!("update.selection_cancelled").to_string()).into());
    }

    if non_interactive {
        for c in &candidates {
            eprintln!("  {}", c.display_label(base));
        }
        return Err(CliError::Usage(t!("update.multiple_archives_non_interactive").to_string()).into());
    }

    if !quiet {
        eprintln!(
            "{} {}",
            style("🔍").cyan(),
            t!("update.auto_found_multiple", count = candidates.len())
        );
    }

    let labels: Vec<String> = candidates.iter().map(|c| c.display_label(base)).collect();

    let selection = if use_fancy_output() {
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt(t!("update.select_archive").to_string())
            .items(&labels)
            .default(0)
            .interact_opt()
            .context("archive selection failed")?
    } else {
        Select::new()
            .with_prompt(t!("update.select_archive").to_string())
            .items(&labels)
            .default(0)
            .interact_opt()
            .context("archive selection failed")?
    };

    match selection.and_then(|idx| candidates.get(idx)) {
        Some(chosen) => Ok(chosen.path.clone()),
        None => Err(CliError::Cancelled(t!("update.selection_cancelled").to_string()).into()),
    }
}
