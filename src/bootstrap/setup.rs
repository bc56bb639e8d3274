//! Setup/initialization module - handles application startup tasks
//!
//! Includes:
//! - Logger initialization
//! - Pipeline tool availability check
//! - Staging folder initialization and stale job cleanup

use crate::background::processors::ArtifactStore;
use anstyle::{AnsiColor, Color, Style};
use anyhow::{Context, Result};
use env_logger::{Builder, WriteStyle};
use log::kv::Key;
use log::{error, info};
use std::{io::Write, path::Path};

// ────────────────────────────────────────────────────────────────
// Logger Initialization
// ────────────────────────────────────────────────────────────────

const DIM: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack)));
const CYAN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan)));

/// Formats a `duration` key-value such as `12.345678ms` as `12.35 ms`.
fn format_duration(raw: &str) -> String {
    if let Some(idx) = raw.find(|c: char| c.is_alphabetic() || c == 'µ') {
        let (num, unit) = (&raw[..idx], &raw[idx..]);
        if let Ok(val) = num.parse::<f32>() {
            return format!("{:.2} {}", val, unit);
        }
    }
    raw.to_string()
}

/// Initialize the logger. INFO globally, WARN for Rocket, overridable through `RUST_LOG`.
pub fn initialize_logger() {
    Builder::new()
        .write_style(WriteStyle::Auto)
        .format(|buf, record| {
            let ts = buf.timestamp();
            let level_style = buf.default_level_style(record.level());

            let dur_raw = record
                .key_values()
                .get(Key::from("duration"))
                .map(|v| format_duration(&v.to_string()))
                .unwrap_or_default();

            // Right-align the duration to width 10 so messages line up
            let dur = if dur_raw.is_empty() {
                " ".repeat(10)
            } else {
                format!("{CYAN}{:>10}{CYAN:#}", dur_raw)
            };

            writeln!(
                buf,
                "{DIM}{ts}{DIM:#} {level_style}{}{level_style:#} {DIM}{}{DIM:#}",
                record.level(),
                record.target()
            )?;

            let message = format!("{}", record.args());
            let subsequent_indent = " ".repeat(11);
            let mut lines = message.lines();
            if let Some(first_line) = lines.next() {
                writeln!(buf, "{} {}", dur, first_line)?;
            }
            for line in lines {
                writeln!(buf, "{}{}", subsequent_indent, line)?;
            }
            Ok(())
        })
        .filter(None, log::LevelFilter::Info)
        .filter(Some("rocket"), log::LevelFilter::Warn)
        .parse_default_env()
        .init();
}

// ────────────────────────────────────────────────────────────────
// Pipeline Tool Check
// ────────────────────────────────────────────────────────────────

/// Reports whether the configured pipeline tool exists. Jobs fail with a launch error if not.
pub fn check_executable(program: &Path) -> bool {
    match std::fs::metadata(program) {
        Ok(meta) if meta.is_file() => {
            info!("Pipeline executable: {:?}", program);
            true
        }
        Ok(_) => {
            error!(
                "`{:?}` exists but is not a file. Please point CHIVE_CV_EXECUTABLE at the built cv tool.",
                program
            );
            false
        }
        Err(_) => {
            error!(
                "`{:?}` was not found. Please build the cv tool or set CHIVE_CV_EXECUTABLE before submitting jobs.",
                program
            );
            false
        }
    }
}

// ────────────────────────────────────────────────────────────────
// Folder Initialization
// ────────────────────────────────────────────────────────────────

/// Creates the staging roots and removes job folders left over from a previous run.
pub fn initialize_folder(store: &ArtifactStore) -> Result<()> {
    store
        .initialize_roots()
        .context("Failed to create staging directories")?;
    store.purge_stale();
    Ok(())
}
