//! Last-used port persistence
//!
//! Remembers the serial port of the previous run so the operator does not
//! have to pass `--port` every time. The file lives in the working
//! directory.
//!
//! ## --no-config-cache flag
//!
//! When the application is started with `--no-config-cache`, all save/load
//! operations are skipped. Call `set_no_cache(true)` early in startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

const FILE_NAME: &str = "powerqa_last_port.json";

/// Global flag to disable config cache (set via --no-config-cache)
static NO_CONFIG_CACHE: AtomicBool = AtomicBool::new(false);

pub fn set_no_cache(enabled: bool) {
    NO_CONFIG_CACHE.store(enabled, Ordering::SeqCst);
    if enabled {
        log::info!("Config cache disabled (--no-config-cache)");
    }
}

fn is_no_cache() -> bool {
    NO_CONFIG_CACHE.load(Ordering::SeqCst)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPort {
    pub port: String,
}

fn default_path() -> Result<PathBuf> {
    let dir = std::env::current_dir().context("Failed to get current working directory")?;
    Ok(dir.join(FILE_NAME))
}

pub fn save_last_port(port: &str) -> Result<()> {
    if is_no_cache() {
        log::debug!("Skipping last-port save (--no-config-cache enabled)");
        return Ok(());
    }
    save_last_port_to(&default_path()?, port)
}

/// Returns `None` when nothing was saved or the cache is disabled.
pub fn load_last_port() -> Result<Option<String>> {
    if is_no_cache() {
        log::debug!("Skipping last-port load (--no-config-cache enabled)");
        return Ok(None);
    }
    load_last_port_from(&default_path()?)
}

pub fn save_last_port_to(path: &Path, port: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(&LastPort {
        port: port.to_string(),
    })
    .context("Failed to serialize last port")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    log::debug!("Saved last port {port} to {}", path.display());
    Ok(())
}

pub fn load_last_port_from(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let json =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let saved: LastPort =
        serde_json::from_str(&json).context("Failed to deserialize last port")?;
    Ok(Some(saved.port).filter(|p| !p.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("powerqa-port-{}.json", uuid::Uuid::new_v4()));
        assert_eq!(load_last_port_from(&path).unwrap(), None);

        save_last_port_to(&path, "/dev/ttyUSB0").unwrap();
        assert_eq!(
            load_last_port_from(&path).unwrap().as_deref(),
            Some("/dev/ttyUSB0")
        );
        fs::remove_file(path).ok();
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("powerqa-port-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, "not json").unwrap();
        assert!(load_last_port_from(&path).is_err());
        fs::remove_file(path).ok();
    }
}
