//! CLI integration tests.

mod support;

use predicates::prelude::*;
use support::*;

#[test]
fn test_rotate_dry_run_exits_with_code() {
    let repo = Repo::standard();

    repo.cmd()
        .arg("rotate")
        .env(
            "CRED_ROTATION_PAYLOAD",
            namespace_request("ns1", "deployment", "DB_PASSWORD", "n3w-pa55"),
        )
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("CREDROT-4004"))
        .stderr(predicate::str::contains("CRED_ROTATION_FORCE=true"));

    assert!(repo.exists(AUDIT));
    assert!(!repo.exists(MANIFEST));
}

#[test]
fn test_rotate_forced_prints_summary() {
    let repo = Repo::standard();

    repo.cmd()
        .arg("rotate")
        .env(
            "CRED_ROTATION_PAYLOAD",
            namespace_request("ns1", "deployment", "DB_PASSWORD", "n3w-pa55"),
        )
        .env("CRED_ROTATION_FORCE", "TRUE")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 credential file(s) updated"))
        .stdout(predicate::str::contains("n3w-pa55").not())
        .stderr(predicate::str::contains("n3w-pa55").not());

    assert_eq!(
        yaml_value(&repo.read(ENV2_CREDS), "db-cred.data.password").as_deref(),
        Some("n3w-pa55")
    );
}

#[test]
fn test_rotate_without_payload() {
    let repo = Repo::standard();

    repo.cmd()
        .arg("rotate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CRED_ROTATION_PAYLOAD"));
}

#[test]
fn test_rotate_without_scope() {
    let repo = Repo::standard();

    repo.cmd()
        .arg("rotate")
        .env_remove("CLUSTER_NAME")
        .env(
            "CRED_ROTATION_PAYLOAD",
            namespace_request("ns1", "deployment", "DB_PASSWORD", "x"),
        )
        .assert()
        .failure()
        .stderr(predicate::str::contains("CLUSTER_NAME"));
}

#[test]
fn test_rotate_zero_affected() {
    let repo = Repo::standard();

    repo.cmd()
        .arg("rotate")
        .env(
            "CRED_ROTATION_PAYLOAD",
            namespace_request("ns1", "deployment", "TOKEN", "x"),
        )
        .env("CRED_ROTATION_FORCE", "true")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no affected parameters"));

    assert!(!repo.exists(AUDIT));
}

#[test]
fn test_rotate_invalid_payload() {
    let repo = Repo::standard();

    repo.cmd()
        .args(["rotate", "--payload", "{not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CREDROT-4002"));
}

#[test]
fn test_scan_json() {
    let repo = Repo::standard();

    let output = repo.cmd().args(["scan", "--json"]).output().unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["backend"], "plain");
    assert_eq!(report["entities"].as_array().unwrap().len(), 3);
    assert_eq!(report["environment_credentials"].as_array().unwrap().len(), 2);
    assert_eq!(report["shared_credentials"][0]["ids"][0], "db-cred");
}

#[test]
fn test_scan_reports_unresolved_shared_file() {
    let repo = Repo::standard();
    repo.put(
        "environments/cluster-1/env-2/Inventory/env_definition.yml",
        "envTemplate:\n  sharedMasterCredentialFiles: [missing-one]\n",
    );

    repo.cmd()
        .arg("scan")
        .assert()
        .success()
        .stdout(predicate::str::contains("missing-one"));
}

#[test]
fn test_extract_attribute() {
    let repo = Repo::standard();

    repo.cmd()
        .args(["extract", ENV1_CREDS, "lonely.data.secret"])
        .current_dir(repo.root())
        .assert()
        .success()
        .stdout("old-secret\n");

    repo.cmd()
        .args(["extract", ENV1_CREDS, "lonely.data.nope"])
        .current_dir(repo.root())
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_fernet_encrypt_and_decrypt_commands() {
    let repo = Repo::standard();
    repo.put("configuration/config.yml", "crypt: true\ncrypt_backend: Fernet\n");
    let key = FERNET_KEY;

    repo.cmd()
        .args(["encrypt", SHARED_CREDS])
        .current_dir(repo.root())
        .env("SECRET_KEY", key)
        .assert()
        .success();
    assert!(repo.read(SHARED_CREDS).contains("[encrypted:AES256_Fernet]"));

    repo.cmd()
        .args(["decrypt", SHARED_CREDS, "--stdout"])
        .current_dir(repo.root())
        .env("SECRET_KEY", key)
        .assert()
        .success()
        .stdout(predicate::str::contains("old-password"));

    repo.cmd()
        .args(["decrypt", SHARED_CREDS])
        .current_dir(repo.root())
        .assert()
        .failure()
        .stderr(predicate::str::contains("SECRET_KEY"));
}

#[test]
fn test_completions() {
    let repo = Repo::new();

    repo.cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("credrot"));
}
