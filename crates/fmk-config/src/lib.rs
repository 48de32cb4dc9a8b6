use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

/// Known secret-like prefixes / patterns. If any leaf string value in the
/// effective config starts with one of these, we abort with CONFIG_SECRET_DETECTED.
/// Secrets belong in env vars; the config names the env var instead.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",        // Stripe / OpenAI style
    "sk_live",    // Stripe live
    "sk_test",    // Stripe test
    "AKIA",       // AWS access key ID
    "-----BEGIN", // PEM private keys
    "ghp_",       // GitHub PAT
    "gho_",       // GitHub OAuth
    "glpat-",     // GitLab PAT
    "xoxb-",      // Slack bot token
    "xoxp-",      // Slack user token
    "eyJhbGciOi", // inline JWTs
];

// ---------------------------------------------------------------------------
// Layered loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

/// Merge JSON config files in order: earlier files are base, later files
/// override. The effective config is hashed so a deployment can be pinned to
/// an exact configuration.
pub fn load_layered_json(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read config path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_json_from_strings(&doc_refs)
}

pub fn load_layered_json_from_strings(json_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in json_docs {
        let v: Value = serde_json::from_str(raw).context("invalid config json")?;
        merged = deep_merge(merged, v);
    }

    // Enforce "no secrets as literal values" policy.
    enforce_no_secret_literals(&merged)?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).context("canonical json serialize failed")
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

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Secret scanning
// ---------------------------------------------------------------------------

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(val) = v.pointer(&ptr) {
            if let Some(s) = val.as_str() {
                if looks_like_secret(s) {
                    bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
                }
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

// ---------------------------------------------------------------------------
// Typed daemon settings
// ---------------------------------------------------------------------------

/// Settings the daemon actually reads from the effective config. Everything
/// sensitive is env-var indirection, never a literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Bind address, e.g. "127.0.0.1:8790".
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Env var holding the Postgres URL.
    #[serde(default = "default_db_url_env")]
    pub db_url_env: String,
    /// Env var holding the JWT signing secret.
    #[serde(default = "default_jwt_secret_env")]
    pub jwt_secret_env: String,
    /// Transition journal path; `None` disables the journal.
    #[serde(default)]
    pub journal_path: Option<String>,
    /// Hash-chain journal entries (tamper evidence).
    #[serde(default = "default_true")]
    pub journal_hash_chain: bool,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8790".to_string()
}

fn default_db_url_env() -> String {
    "FMK_DATABASE_URL".to_string()
}

fn default_jwt_secret_env() -> String {
    "FMK_JWT_SECRET".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_url_env: default_db_url_env(),
            jwt_secret_env: default_jwt_secret_env(),
            journal_path: None,
            journal_hash_chain: true,
        }
    }
}

impl DaemonSettings {
    /// Extract the `daemon` section of an effective config; missing section
    /// yields the defaults.
    pub fn from_config(config: &Value) -> Result<Self> {
        match config.get("daemon") {
            Some(section) => serde_json::from_value(section.clone())
                .context("invalid daemon config section"),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_layers_override_earlier_ones() {
        let base = r#"{"daemon": {"bind_addr": "127.0.0.1:8790"}, "keep": 1}"#;
        let over = r#"{"daemon": {"bind_addr": "0.0.0.0:9000"}}"#;
        let loaded = load_layered_json_from_strings(&[base, over]).unwrap();
        assert_eq!(
            loaded.config_json["daemon"]["bind_addr"],
            json!("0.0.0.0:9000")
        );
        assert_eq!(loaded.config_json["keep"], json!(1));
    }

    #[test]
    fn config_hash_is_stable_across_key_order() {
        let a = r#"{"x": 1, "y": {"b": 2, "a": 3}}"#;
        let b = r#"{"y": {"a": 3, "b": 2}, "x": 1}"#;
        let ha = load_layered_json_from_strings(&[a]).unwrap().config_hash;
        let hb = load_layered_json_from_strings(&[b]).unwrap().config_hash;
        assert_eq!(ha, hb);
    }

    #[test]
    fn inline_secret_aborts_load() {
        let bad = r#"{"db": {"password": "sk_live_0123456789abcdef"}}"#;
        let err = load_layered_json_from_strings(&[bad]).unwrap_err();
        assert!(err.to_string().contains("CONFIG_SECRET_DETECTED"));
    }

    #[test]
    fn secret_scan_redacts_the_value() {
        let bad = r#"{"token": "ghp_abcdefghijklmnop"}"#;
        let err = load_layered_json_from_strings(&[bad]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("REDACTED"));
        assert!(!msg.contains("ghp_abcdefghijklmnop"));
    }

    #[test]
    fn daemon_settings_default_when_section_missing() {
        let loaded = load_layered_json_from_strings(&[r#"{"other": true}"#]).unwrap();
        let settings = DaemonSettings::from_config(&loaded.config_json).unwrap();
        assert_eq!(settings.bind_addr, "127.0.0.1:8790");
        assert_eq!(settings.db_url_env, "FMK_DATABASE_URL");
        assert!(settings.journal_path.is_none());
        assert!(settings.journal_hash_chain);
    }

    #[test]
    fn daemon_settings_read_from_section() {
        let cfg = r#"{"daemon": {"bind_addr": "0.0.0.0:80", "journal_path": "/var/log/fmk/journal.jsonl"}}"#;
        let loaded = load_layered_json_from_strings(&[cfg]).unwrap();
        let settings = DaemonSettings::from_config(&loaded.config_json).unwrap();
        assert_eq!(settings.bind_addr, "0.0.0.0:80");
        assert_eq!(
            settings.journal_path.as_deref(),
            Some("/var/log/fmk/journal.jsonl")
        );
    }
}
