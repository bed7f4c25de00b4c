//! Hash-chained, append-only audit log
//!
//! Each entry's hash is `SHA-256(serialize(actor, action, resource_type,
//! resource_id, timestamp) ++ previous_hash)`, with the literal `"genesis"`
//! standing in for the previous hash of the first entry.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::errors::PromoterError;
use crate::utils::sha256_hash;

/// Previous-hash placeholder of the first entry
pub const GENESIS: &str = "genesis";

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub actor: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,

    /// Not covered by the hash
    #[serde(default)]
    pub metadata: serde_json::Value,

    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
}

/// Fields covered by the hash, in serialization order
#[derive(Serialize)]
struct HashedFields<'a> {
    actor: &'a str,
    action: &'a str,
    resource_type: &'a str,
    resource_id: &'a str,
    timestamp: String,
}

/// Compute an entry hash from its covered fields and the previous hash
pub fn compute_hash(
    actor: &str,
    action: &str,
    resource_type: &str,
    resource_id: &str,
    timestamp: &DateTime<Utc>,
    previous_hash: &str,
) -> String {
    let fields = HashedFields {
        actor,
        action,
        resource_type,
        resource_id,
        timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
    };
    // Serializing a struct of strings cannot fail
    let serialized = serde_json::to_string(&fields).unwrap_or_default();

    sha256_hash(format!("{}{}", serialized, previous_hash).as_bytes())
}

/// Outcome of recomputing the chain from genesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_entries: usize,
    pub first_invalid_seq: Option<u64>,

    /// Every entry whose stored hash or link disagrees with the recomputation
    pub invalid_seqs: Vec<u64>,
}

/// Recompute hashes forward from genesis and compare with the stored ones.
///
/// The recomputed hash, not the stored one, feeds the next link, so one
/// altered entry invalidates itself and everything after it.
pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerification {
    let mut expected_previous = GENESIS.to_string();
    let mut invalid_seqs = Vec::new();

    for entry in entries {
        let recomputed = compute_hash(
            &entry.actor,
            &entry.action,
            &entry.resource_type,
            &entry.resource_id,
            &entry.timestamp,
            &expected_previous,
        );
        if entry.previous_hash != expected_previous || entry.hash != recomputed {
            invalid_seqs.push(entry.seq);
        }
        expected_previous = recomputed;
    }

    ChainVerification {
        valid: invalid_seqs.is_empty(),
        total_entries: entries.len(),
        first_invalid_seq: invalid_seqs.first().copied(),
        invalid_seqs,
    }
}

/// Narrow audit writer used by the engine
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn log_audit(
        &self,
        actor: &str,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        metadata: serde_json::Value,
    ) -> Result<AuditEntry, PromoterError>;

    async fn entries(&self) -> Result<Vec<AuditEntry>, PromoterError>;

    async fn verify(&self) -> Result<ChainVerification, PromoterError> {
        Ok(verify_chain(&self.entries().await?))
    }
}

/// Append an entry, logging instead of propagating a write failure
pub async fn record(
    log: &dyn AuditLog,
    actor: &str,
    action: &str,
    resource_type: &str,
    resource_id: &str,
    metadata: serde_json::Value,
) {
    if let Err(e) = log
        .log_audit(actor, action, resource_type, resource_id, metadata)
        .await
    {
        error!(actor, action, resource_id, "Failed to write audit entry: {}", e);
    }
}

/// Audit log kept in memory, optionally mirrored to a JSON-lines file
pub struct HashChainAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    file: Option<PathBuf>,
}

impl HashChainAuditLog {
    /// Memory-only log
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            file: None,
        }
    }

    /// Log persisted to `path`, resuming the chain from its existing entries
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, PromoterError> {
        let path = path.into();
        let mut entries = Vec::new();

        if tokio::fs::try_exists(&path).await? {
            let contents = tokio::fs::read_to_string(&path).await?;
            for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                entries.push(serde_json::from_str::<AuditEntry>(line)?);
            }
            debug!("Loaded {} audit entries from {}", entries.len(), path.display());
        } else if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        Ok(Self {
            entries: Mutex::new(entries),
            file: Some(path),
        })
    }

    async fn persist(&self, entry: &AuditEntry) -> Result<(), PromoterError> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }
}

impl Default for HashChainAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditLog for HashChainAuditLog {
    async fn log_audit(
        &self,
        actor: &str,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        metadata: serde_json::Value,
    ) -> Result<AuditEntry, PromoterError> {
        // Held across the file write so entries land in chain order
        let mut entries = self.entries.lock().await;

        let previous_hash = entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS.to_string());
        let timestamp = Utc::now();
        let hash = compute_hash(
            actor,
            action,
            resource_type,
            resource_id,
            &timestamp,
            &previous_hash,
        );

        let entry = AuditEntry {
            seq: entries.len() as u64 + 1,
            actor: actor.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            metadata,
            timestamp,
            previous_hash,
            hash,
        };

        self.persist(&entry).await?;
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn entries(&self) -> Result<Vec<AuditEntry>, PromoterError> {
        Ok(self.entries.lock().await.clone())
    }
}
