use crate::error::CrowdfundError;
use crate::types::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Campaign events recorded in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Registration,
    Contribution,
    Pledge,
    Claim,
    Settlement,
    MintPayment,
}

/// Hash-chained audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub index: u64,
    pub kind: AuditKind,
    pub account: Option<AccountId>,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

/// Append-only audit log for one campaign instance.
///
/// No in-place mutation is exposed; every participant action becomes one
/// more hash-chained record, so the settlement history can be verified
/// after the fact.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Append one entry stamped at `at`, the caller's notion of now.
    ///
    /// The log never reads the wall clock itself; entries carry the same
    /// time the operation that produced them observed.
    pub fn record(
        &mut self,
        kind: AuditKind,
        account: Option<AccountId>,
        at: DateTime<Utc>,
        payload: &impl Serialize,
    ) -> Result<&AuditEntry, CrowdfundError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| CrowdfundError::Audit(format!("unrecordable payload: {e}")))?;

        let index = self.entries.len() as u64;
        let timestamp = at;
        let previous_hash = self.entries.last().map(|entry| entry.entry_hash.clone());
        let entry_hash = compute_entry_hash(
            index,
            &kind,
            account,
            timestamp,
            &payload,
            previous_hash.as_deref(),
        );

        self.entries.push(AuditEntry {
            entry_id: Uuid::new_v4().to_string(),
            index,
            kind,
            account,
            timestamp,
            payload,
            previous_hash,
            entry_hash,
        });
        Ok(self.entries.last().expect("just pushed"))
    }

    pub fn verify_chain(&self) -> bool {
        let mut previous_hash: Option<String> = None;
        for entry in &self.entries {
            let expected = compute_entry_hash(
                entry.index,
                &entry.kind,
                entry.account,
                entry.timestamp,
                &entry.payload,
                previous_hash.as_deref(),
            );
            if entry.entry_hash != expected || entry.previous_hash != previous_hash {
                return false;
            }
            previous_hash = Some(entry.entry_hash.clone());
        }
        true
    }
}

fn compute_entry_hash(
    index: u64,
    kind: &AuditKind,
    account: Option<AccountId>,
    timestamp: DateTime<Utc>,
    payload: &Value,
    previous_hash: Option<&str>,
) -> String {
    let material = serde_json::json!({
        "index": index,
        "kind": kind,
        "account": account,
        "timestamp": timestamp,
        "payload": payload,
        "previous_hash": previous_hash,
    });
    let bytes = serde_json::to_vec(&material).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}
