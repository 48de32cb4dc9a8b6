//! CLI behavior that needs no database: quoting, config hashing, journal
//! verification, and the missing-env failure mode for db commands.

use assert_cmd::Command;
use predicates::prelude::*;

fn fmk() -> Command {
    Command::cargo_bin("fmk").expect("fmk binary")
}

#[test]
fn quote_known_lane_prints_breakdown() {
    fmk()
        .args([
            "quote",
            "--origin",
            "Casablanca",
            "--destination",
            "Madrid",
            "--weight-kg",
            "15000",
            "--equipment",
            "refrigerated",
            "--urgency",
            "urgent",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"distance_km\": 1050"))
        .stdout(predicate::str::contains("\"base_cents\": 340200"))
        .stdout(predicate::str::contains("\"tiers\""));
}

#[test]
fn quote_rejects_unknown_equipment() {
    fmk()
        .args([
            "quote",
            "--origin",
            "Casablanca",
            "--destination",
            "Madrid",
            "--weight-kg",
            "8000",
            "--equipment",
            "hovercraft",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown equipment type"));
}

#[test]
fn config_hash_is_stable_across_key_order() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.json");
    let b = dir.path().join("b.json");
    std::fs::write(&a, r#"{"x": 1, "y": {"b": 2, "a": 3}}"#).unwrap();
    std::fs::write(&b, r#"{"y": {"a": 3, "b": 2}, "x": 1}"#).unwrap();

    let out_a = fmk()
        .args(["config-hash", a.to_str().unwrap()])
        .output()
        .unwrap();
    let out_b = fmk()
        .args(["config-hash", b.to_str().unwrap()])
        .output()
        .unwrap();

    assert!(out_a.status.success());
    let hash_a = String::from_utf8_lossy(&out_a.stdout)
        .lines()
        .next()
        .unwrap()
        .to_string();
    let hash_b = String::from_utf8_lossy(&out_b.stdout)
        .lines()
        .next()
        .unwrap()
        .to_string();
    assert_eq!(hash_a, hash_b);
}

#[test]
fn config_with_inline_secret_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, r#"{"api": {"key": "sk_live_0123456789abcdef"}}"#).unwrap();

    fmk()
        .args(["config-hash", bad.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"));
}

#[test]
fn journal_verify_flags_a_tampered_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.jsonl");

    {
        let mut journal = fmk_audit::TransitionJournal::open(&path, true).unwrap();
        for i in 0..3 {
            journal
                .append(
                    uuid_for(i),
                    None,
                    "posted",
                    serde_json::json!({ "i": i }),
                )
                .unwrap();
        }
    }

    fmk()
        .args(["journal", "verify", "--path", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid (3 entries)"));

    // Flip a byte in the middle line's detail.
    let content = std::fs::read_to_string(&path).unwrap();
    let tampered = content.replacen("\"i\":1", "\"i\":9", 1);
    assert_ne!(content, tampered, "tamper target must exist");
    std::fs::write(&path, tampered).unwrap();

    fmk()
        .args(["journal", "verify", "--path", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("BROKEN"));
}

#[test]
fn db_status_without_env_reports_missing_var() {
    fmk()
        .env_remove("FMK_DATABASE_URL")
        .args(["db", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("FMK_DATABASE_URL"));
}

fn uuid_for(i: u32) -> uuid::Uuid {
    uuid::Uuid::from_u128(0x5EED_0000_0000_0000_0000_0000_0000_0000u128 + i as u128)
}
