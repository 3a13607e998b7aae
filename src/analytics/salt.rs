//! Per-day salt storage
//!
//! A salt is generated the first time a date is asked for and never changes
//! afterwards. The store is the source of truth: a caller that loses a
//! creation race reads back the winning value instead of using its own.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::analytics::models::date_key;

#[async_trait]
pub trait SaltStore: Send + Sync {
    /// Return the salt for `date`, creating and persisting it on first use
    async fn salt_for(&self, date: NaiveDate) -> Result<String>;
}

/// 128 bits of randomness, hex encoded
fn generate_salt() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Salts stored as `.salt_YYYY-MM-DD` files next to the event logs
pub struct FileSaltStore {
    dir: PathBuf,
}

impl FileSaltStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn salt_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!(".salt_{}", date_key(date)))
    }

    async fn read_salt(path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                let salt = contents.trim();
                if salt.is_empty() {
                    return Err(anyhow!("salt file {} is empty", path.display()));
                }
                Ok(Some(salt.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read salt {}", path.display())),
        }
    }

    /// Publish a fresh salt with a hard link so readers never observe a
    /// partially written file and only one writer can win.
    async fn create_salt(&self, path: &Path) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let salt = generate_salt();
        let tmp_path = self
            .dir
            .join(format!(".salt_tmp_{:016x}", rand::random::<u64>()));

        tokio::fs::write(&tmp_path, &salt)
            .await
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;

        let linked = tokio::fs::hard_link(&tmp_path, path).await;
        if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
            warn!(path = %tmp_path.display(), error = %e, "failed to remove temporary salt file");
        }

        match linked {
            Ok(()) => {
                debug!(path = %path.display(), "created daily salt");
                Ok(salt)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "lost salt creation race, re-reading");
                Self::read_salt(path)
                    .await?
                    .ok_or_else(|| anyhow!("salt {} vanished after creation race", path.display()))
            }
            Err(e) => Err(e).with_context(|| format!("failed to publish salt {}", path.display())),
        }
    }
}

#[async_trait]
impl SaltStore for FileSaltStore {
    async fn salt_for(&self, date: NaiveDate) -> Result<String> {
        let path = self.salt_path(date);

        if let Some(salt) = Self::read_salt(&path).await? {
            return Ok(salt);
        }

        self.create_salt(&path).await
    }
}

/// Volatile salt store for tests and embedded use
#[derive(Default)]
pub struct MemorySaltStore {
    salts: DashMap<NaiveDate, String>,
}

impl MemorySaltStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the salt for a date
    pub fn with_salt(self, date: NaiveDate, salt: impl Into<String>) -> Self {
        self.salts.insert(date, salt.into());
        self
    }
}

#[async_trait]
impl SaltStore for MemorySaltStore {
    async fn salt_for(&self, date: NaiveDate) -> Result<String> {
        Ok(self
            .salts
            .entry(date)
            .or_insert_with(generate_salt)
            .value()
            .clone())
    }
}
