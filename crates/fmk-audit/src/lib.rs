//! Append-only journal of workflow transitions. Writes JSON Lines (one entry
//! per line). Optional hash chain: each entry can include hash_prev + hash_self
//! so any rewrite of history is detectable after the fact.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Append-only journal writer for shipment/bid transitions.
pub struct TransitionJournal {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Monotonically increasing sequence counter used in entry-id derivation.
    /// When resuming an existing journal after restart, restore with
    /// `set_seq(entries_already_written)` alongside `set_last_hash`.
    seq: u64,
}

impl TransitionJournal {
    /// Creates the journal writer and ensures parent dirs exist.
    pub fn open(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }

        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Set last hash explicitly (e.g., after reading the last line on restart).
    pub fn set_last_hash(&mut self, last_hash: Option<String>) {
        self.last_hash = last_hash;
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    /// Restore the sequence counter when resuming an existing journal. Must be
    /// called together with `set_last_hash` for correct restart semantics.
    pub fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append one transition entry.
    ///
    /// `actor_id` is the authenticated user that drove the transition; `None`
    /// for system-driven writes. `detail` is free-form context (old/new status,
    /// bid id, amounts).
    pub fn append(
        &mut self,
        shipment_id: Uuid,
        actor_id: Option<Uuid>,
        action: &str,
        detail: Value,
    ) -> Result<JournalEntry> {
        let ts_utc = Utc::now();
        // Entry id derived deterministically from chain state + detail + seq,
        // so a replayed journal reproduces identical ids. No RNG.
        let entry_id = derive_entry_id(self.last_hash.as_deref(), &detail, self.seq)?;
        self.seq += 1;

        let mut entry = JournalEntry {
            entry_id,
            shipment_id,
            ts_utc,
            actor_id,
            action: action.to_string(),
            detail,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            entry.hash_prev = self.last_hash.clone();

            let self_hash = compute_entry_hash(&entry)?;
            entry.hash_self = Some(self_hash.clone());
            self.last_hash = Some(self_hash);
        }

        let line = canonical_json_line(&entry)?;
        append_line(&self.path, &line)?;

        Ok(entry)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub entry_id: Uuid,
    pub shipment_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    /// Transition name, e.g. "bid_accepted", "cancelled", "delivered".
    pub action: String,
    pub detail: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Deterministic entry-id derivation: v5 UUID over the chain tip, the
/// canonical detail payload, and the sequence number.
fn derive_entry_id(last_hash: Option<&str>, detail: &Value, seq: u64) -> Result<Uuid> {
    let canonical_detail =
        serde_json::to_string(&sort_keys(detail)).context("canonicalize detail failed")?;
    let material = format!("{}|{}|{}", last_hash.unwrap_or(""), canonical_detail, seq);
    Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, material.as_bytes()))
}

/// Write a single line to file (with trailing newline).
fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open journal {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write journal line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
/// One entry == one JSON line.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize journal entry failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Hash is computed from canonical JSON of the entry WITHOUT hash_self (to
/// avoid self-reference).
pub fn compute_entry_hash(entry: &JournalEntry) -> Result<String> {
    let mut clone = entry.clone();
    clone.hash_self = None;

    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Verify the hash chain integrity of a journal file.
pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read journal {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Same logic as [`verify_hash_chain`] but over in-memory JSONL content.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut line_count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let entry: JournalEntry = serde_json::from_str(trimmed)
            .with_context(|| format!("parse journal entry at line {}", i + 1))?;

        line_count += 1;

        // 1. hash_prev must match the previous entry's hash_self.
        if entry.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, entry.hash_prev
                ),
            });
        }

        // 2. hash_self must be correct for this entry's content.
        if let Some(ref claimed_hash) = entry.hash_self {
            let recomputed = compute_entry_hash(&entry)?;
            if *claimed_hash != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!(
                        "hash_self mismatch: claimed {}, recomputed {}",
                        claimed_hash, recomputed
                    ),
                });
            }
        }

        prev_hash = entry.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines: line_count })
}

/// Result of hash chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    /// The entire chain is valid.
    Valid { lines: usize },
    /// The chain is broken at the given line.
    Broken { line: usize, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_id_is_deterministic_for_identical_inputs() {
        let detail = json!({"from": "posted", "to": "assigned"});
        let a = derive_entry_id(Some("abc"), &detail, 3).unwrap();
        let b = derive_entry_id(Some("abc"), &detail, 3).unwrap();
        assert_eq!(a, b);

        let c = derive_entry_id(Some("abc"), &detail, 4).unwrap();
        assert_ne!(a, c, "seq must change the id");
    }

    #[test]
    fn canonicalization_sorts_keys_recursively() {
        let v = json!({"b": {"z": 1, "a": 2}, "a": 1});
        let s = serde_json::to_string(&sort_keys(&v)).unwrap();
        assert_eq!(s, r#"{"a":1,"b":{"a":2,"z":1}}"#);
    }
}
