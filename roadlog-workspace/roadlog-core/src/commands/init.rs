// src/commands/init.rs

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::CoreConfig;

#[derive(Debug, Clone)]
pub struct InitReport {
    pub root: PathBuf,
    pub created: Vec<String>,
    pub existed: Vec<String>,
}

/// Resolve the data root: explicit path, then ROADLOG_ROOT, then `.roadlog`.
pub fn data_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    std::env::var_os("ROADLOG_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".roadlog"))
}

/// Lay out the data root (idempotent). Safe to call often.
///
/// The config file is written first, then read back, so the database
/// directory and the seeded logbook follow whatever paths it names.
pub fn ensure_initialized(root: &Path) -> Result<InitReport> {
    let root = root.to_path_buf();
    let mut created = Vec::new();
    let mut existed = Vec::new();

    ensure_dir(&root, &root, &mut created, &mut existed)?;
    ensure_file(
        &root,
        "config.toml",
        DEFAULT_CONFIG_TOML,
        &mut created,
        &mut existed,
    )?;

    let cfg = CoreConfig::load(&root)?;
    if let Some(db_dir) = cfg.store.db_path.parent() {
        ensure_dir(&root, db_dir, &mut created, &mut existed)?;
    }
    ensure_dir(&root, &cfg.logbook.path, &mut created, &mut existed)?;

    let init_event = format!(
        r#"{{"timestamp":"{}","module":"init","message":"data root initialized"}}"#,
        Utc::now().to_rfc3339()
    );
    ensure_seeded_jsonl(
        &root,
        &cfg.logbook.events,
        &init_event,
        &mut created,
        &mut existed,
    )?;

    Ok(InitReport { root, created, existed })
}

/// Report label: relative to the root when inside it, "." for the root itself.
fn label(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.display().to_string(),
        Err(_) => path.display().to_string(),
    }
}

fn ensure_dir(
    root: &Path,
    dir: &Path,
    created: &mut Vec<String>,
    existed: &mut Vec<String>,
) -> Result<()> {
    if dir.is_dir() {
        existed.push(label(root, dir));
        return Ok(());
    }
    fs::create_dir_all(dir).with_context(|| format!("create_dir_all({:?})", dir))?;
    created.push(label(root, dir));
    Ok(())
}

fn ensure_file(
    base: &Path,
    rel_file: &str,
    content_if_absent: &str,
    created: &mut Vec<String>,
    existed: &mut Vec<String>,
) -> Result<()> {
    let p = base.join(rel_file);
    if p.exists() {
        existed.push(rel_file.to_string());
        return Ok(());
    }
    write_atomic(&p, content_if_absent.as_bytes())?;
    created.push(rel_file.to_string());
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create_dir_all({:?})", parent))?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut f = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .with_context(|| format!("open temp file {:?}", tmp))?;
        f.write_all(bytes)?;
        f.flush()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("rename {:?} -> {:?}", tmp, path))?;
    Ok(())
}

/// Create the logbook with `init_line`, or seed it if it exists but is empty.
fn ensure_seeded_jsonl(
    root: &Path,
    path: &Path,
    init_line: &str,
    created: &mut Vec<String>,
    existed: &mut Vec<String>,
) -> Result<()> {
    if !path.exists() {
        write_atomic(path, format!("{init_line}\n").as_bytes())?;
        created.push(label(root, path));
        return Ok(());
    }
    existed.push(label(root, path));
    if fs::metadata(path)?.len() == 0 {
        let mut f = OpenOptions::new().append(true).open(path)?;
        f.write_all(init_line.as_bytes())?;
        f.write_all(b"\n")?;
    }
    Ok(())
}

// ---------- defaults ----------

const DEFAULT_CONFIG_TOML: &str = r#"# roadlog configuration.
# Relative paths resolve against this directory.

[tracking]
speed_threshold = 5.0     # m/s; fixes at or above this count as driving
sample_rate = 5           # persist every Nth in-trip fix
buffer_capacity = 12      # pre-trip samples kept while below the threshold

[trips]
separator_secs = 300      # journal gap that splits two trips
min_entries = 2           # shorter segments are discarded
hard_acceleration = 3.0   # m/s^2
hard_deceleration = 3.0   # m/s^2

[store]
db_path = "db/journal.db"

[logbook]
path = "logbook"
events = "logbook/events.jsonl"

[services]
logbook_enabled = true
"#;
