//! Filesystem helpers shared by the task actions.

use std::fmt::Display;
use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;

use crate::config::Config;
use crate::error::CleanError;

const ANSI_BLUE: Style = Style::new().blue();

/// Formats the time elapsed since `s` for log lines, e.g. `(+12ms)`.
pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Delete the revisioned output directories from the previous build.
///
/// Only `dist/css` and `dist/bundle` are removed; fingerprinted filenames from
/// an older run must never mix with the current run's manifest. Other dist
/// entries are overwritten in place by their transforms.
pub fn clean(config: &Config) -> Result<(), CleanError> {
    let s = Instant::now();

    for dir in [config.paths.dist.join("css"), config.paths.dist.join("bundle")] {
        if fs::metadata(&dir).is_ok() {
            fs::remove_dir_all(&dir).map_err(|e| CleanError::Remove(dir.to_string(), e))?;
        }
    }

    fs::create_dir_all(&config.paths.dist)
        .map_err(|e| CleanError::Create(config.paths.dist.to_string(), e))?;

    tracing::info!("Cleaned stale output {}", as_overhead(s));

    Ok(())
}

/// Create the parent directory of `path` if it is missing.
pub fn ensure_parent(path: &Utf8Path) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Recursively list every file under `dir`, sorted for deterministic order.
pub fn walk_files(dir: &Utf8Path) -> std::io::Result<Vec<Utf8PathBuf>> {
    let mut acc = Vec::new();
    walk_rec(dir, &mut acc)?;
    acc.sort();
    Ok(acc)
}

fn walk_rec(dir: &Utf8Path, acc: &mut Vec<Utf8PathBuf>) -> std::io::Result<()> {
    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        let filetype = entry.file_type()?;
        if filetype.is_dir() {
            walk_rec(entry.path(), acc)?;
        } else {
            acc.push(entry.path().to_path_buf());
        }
    }
    Ok(())
}
