//! Client identity resolution
//!
//! A device-supplied UID is used verbatim and marked trusted. Anything else is
//! anonymized as `sha256("<raw>:<daily salt>")` truncated to 16 hex chars, so
//! the same client is stable within a day and unlinkable across days.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::analytics::error::{IngestError, IngestResult};
use crate::analytics::models::ClientIdentity;
use crate::analytics::salt::SaltStore;

/// Length of an anonymous identifier in hex characters
pub const ANONYMOUS_ID_LEN: usize = 16;

/// Hash a raw client signal with a daily salt
pub fn hash_client(raw_client_signal: &str, daily_salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_client_signal.as_bytes());
    hasher.update(b":");
    hasher.update(daily_salt.as_bytes());

    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(ANONYMOUS_ID_LEN);
    hex
}

pub struct IdentityResolver {
    salts: Arc<dyn SaltStore>,
}

impl IdentityResolver {
    pub fn new(salts: Arc<dyn SaltStore>) -> Self {
        Self { salts }
    }

    /// Resolve the identifier for a ping observed on `date`
    ///
    /// Fails closed when the salt cannot be obtained: no volatile fallback
    /// salt is ever used.
    pub async fn resolve(
        &self,
        raw_client_signal: &str,
        trusted_device_id: Option<&str>,
        date: NaiveDate,
    ) -> IngestResult<ClientIdentity> {
        if let Some(uid) = trusted_device_id.filter(|uid| !uid.is_empty()) {
            return Ok(ClientIdentity {
                id: uid.to_string(),
                trusted: true,
            });
        }

        let salt = self
            .salts
            .salt_for(date)
            .await
            .map_err(IngestError::storage)?;

        Ok(ClientIdentity {
            id: hash_client(raw_client_signal, &salt),
            trusted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::salt::MemorySaltStore;
    use anyhow::anyhow;
    use async_trait::async_trait;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, d).unwrap()
    }

    struct BrokenSaltStore;

    #[async_trait]
    impl SaltStore for BrokenSaltStore {
        async fn salt_for(&self, _date: NaiveDate) -> anyhow::Result<String> {
            Err(anyhow!("disk on fire"))
        }
    }

    #[test]
    fn test_hash_client_known_value() {
        // First 16 hex chars of sha256("203.0.113.7:abc")
        assert_eq!(hash_client("203.0.113.7", "abc"), "2adaf74c10b4cc69");

        let full = format!("{:x}", Sha256::digest(b"203.0.113.7:abc"));
        assert_eq!(full.len(), 64);
        assert!(full.starts_with(&hash_client("203.0.113.7", "abc")));
    }

    #[tokio::test]
    async fn test_trusted_uid_is_used_verbatim() {
        let resolver = IdentityResolver::new(Arc::new(BrokenSaltStore));
        let identity = resolver
            .resolve("203.0.113.7", Some("dev123"), day(1))
            .await
            .unwrap();

        assert_eq!(identity.id, "dev123");
        assert!(identity.trusted);
    }

    #[tokio::test]
    async fn test_empty_uid_falls_back_to_hash() {
        let salts = MemorySaltStore::new().with_salt(day(1), "s1");
        let resolver = IdentityResolver::new(Arc::new(salts));

        let identity = resolver.resolve("203.0.113.7", Some(""), day(1)).await.unwrap();
        assert!(!identity.trusted);
        assert_eq!(identity.id, hash_client("203.0.113.7", "s1"));
    }

    #[tokio::test]
    async fn test_same_address_stable_within_day_unlinkable_across_days() {
        let salts = MemorySaltStore::new()
            .with_salt(day(1), "salt-one")
            .with_salt(day(2), "salt-two");
        let resolver = IdentityResolver::new(Arc::new(salts));

        let a = resolver.resolve("198.51.100.4", None, day(1)).await.unwrap();
        let b = resolver.resolve("198.51.100.4", None, day(1)).await.unwrap();
        let c = resolver.resolve("198.51.100.4", None, day(2)).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn test_salt_failure_fails_closed() {
        let resolver = IdentityResolver::new(Arc::new(BrokenSaltStore));
        let err = resolver.resolve("198.51.100.4", None, day(1)).await.unwrap_err();
        assert_eq!(err.kind(), "StorageUnavailable");
    }
}
