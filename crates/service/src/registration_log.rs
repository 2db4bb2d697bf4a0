//! Durable, append-only record of registry changes (JSON lines).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use toolsmith_core::catalog::HttpMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationOp {
    Register,
    Supersede,
    Retire,
}

/// Where a registry entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Builtin,
    Extension,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub timestamp: DateTime<Utc>,
    pub generation: u64,
    pub op: RegistrationOp,
    pub method: HttpMethod,
    pub path: String,
    pub origin: Origin,
}

pub struct RegistrationLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl RegistrationLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open registration log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Append records and sync them to disk before returning.
    pub fn append(&self, records: &[RegistrationRecord]) -> Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("registration log lock poisoned"))?;

        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{line}")
                .with_context(|| format!("failed to write {}", self.path.display()))?;
        }
        file.flush().context("failed to flush registration log")?;
        file.sync_data()
            .with_context(|| format!("failed to sync {}", self.path.display()))?;
        Ok(())
    }

    pub fn read_all(path: &Path) -> Result<Vec<RegistrationRecord>> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("malformed registration log line"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/registrations.log");

        let record = RegistrationRecord {
            timestamp: Utc::now(),
            generation: 1,
            op: RegistrationOp::Register,
            method: HttpMethod::Get,
            path: "/power".into(),
            origin: Origin::Builtin,
        };

        RegistrationLog::open(&path).unwrap().append(&[record.clone()]).unwrap();
        let log = RegistrationLog::open(&path).unwrap();
        let mut second = record.clone();
        second.generation = 2;
        second.op = RegistrationOp::Retire;
        log.append(&[second]).unwrap();

        let records = RegistrationLog::read_all(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], record);
        assert_eq!(records[1].op, RegistrationOp::Retire);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.lines().next().unwrap().contains(r#""op":"register""#));
    }
}
