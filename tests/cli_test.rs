//! CLI integration tests for the sieve binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("sieve"))
}

// Helper to create a temp file
fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

const PERSON: &str = r#"{
    "type": "object",
    "keys": {
        "name": { "type": "string", "flags": { "presence": "required" } },
        "age": {
            "type": "number",
            "rules": [{ "name": "min", "args": { "limit": 0 } }]
        }
    }
}"#;

mod validate_command {
    use super::*;

    #[test]
    fn valid_payload_prints_sanitized_value() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", PERSON);
        let payload = write_temp_file(&dir, "payload.json", r#"{"name": "Ada", "age": "36"}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#"{"name":"Ada","age":36}"#));
    }

    #[test]
    fn no_convert_rejects_strings() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", PERSON);
        let payload = write_temp_file(&dir, "payload.json", r#"{"name": "Ada", "age": "36"}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--no-convert",
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains(r#""age" must be a number"#));
    }

    #[test]
    fn invalid_payload_text_output() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", PERSON);
        let payload = write_temp_file(&dir, "payload.json", r#"{"age": 3}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Validation failed:"))
            .stderr(predicate::str::contains(r#""name" is required"#));
    }

    #[test]
    fn all_errors_reports_every_violation() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", PERSON);
        let payload = write_temp_file(&dir, "payload.json", r#"{"age": -1}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--all-errors",
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains(r#""name" is required"#))
            .stderr(predicate::str::contains(
                r#""age" must be greater than or equal to 0"#,
            ));
    }

    #[test]
    fn json_output_lists_details() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", PERSON);
        let payload = write_temp_file(&dir, "payload.json", r#"{"name": "Ada", "age": -1}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--json",
            ])
            .assert()
            .code(1)
            .stdout(predicate::str::contains(r#""valid":false"#))
            .stdout(predicate::str::contains(r#""type":"number.min""#))
            .stdout(predicate::str::contains(r#""path":["age"]"#));
    }

    #[test]
    fn json_output_valid() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", PERSON);
        let payload = write_temp_file(&dir, "payload.json", r#"{"name": "Ada"}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--json",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                r#"{"valid":true,"value":{"name":"Ada"}}"#,
            ));
    }

    #[test]
    fn pretty_output() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", PERSON);
        let payload = write_temp_file(&dir, "payload.json", r#"{"name": "Ada"}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--pretty",
            ])
            .assert()
            .success()
            // Pretty output has newlines and indentation
            .stdout(predicate::str::contains("{\n"));
    }

    #[test]
    fn context_feeds_global_references() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{
                "type": "number",
                "rules": [{ "name": "max", "args": { "limit": { "$ref": "$limit" } } }]
            }"#,
        );
        let payload = write_temp_file(&dir, "payload.json", "7");
        let context = write_temp_file(&dir, "context.json", r#"{"limit": 5}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--context",
                context.to_str().unwrap(),
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("must be less than or equal to 5"));
    }

    #[test]
    fn prefs_file_strips_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", PERSON);
        let payload = write_temp_file(&dir, "payload.json", r#"{"name": "Ada", "extra": 1}"#);
        let prefs = write_temp_file(&dir, "prefs.json", r#"{"stripUnknown": true}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--prefs",
                prefs.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#"{"name":"Ada"}"#));
    }

    #[test]
    fn unknown_keys_rejected_by_default() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", PERSON);
        let payload = write_temp_file(&dir, "payload.json", r#"{"name": "Ada", "extra": 1}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains(r#""extra" is not allowed"#));
    }

    #[test]
    fn conditions_from_description() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{
                "type": "object",
                "keys": {
                    "kind": { "type": "string", "valid": ["card", "cash"] },
                    "number": {
                        "type": "string",
                        "whens": [{
                            "ref": "kind",
                            "is": "card",
                            "then": { "type": "string", "flags": { "presence": "required" } },
                            "otherwise": { "type": "string", "flags": { "presence": "forbidden" } }
                        }]
                    }
                }
            }"#,
        );
        let card = write_temp_file(&dir, "card.json", r#"{"kind": "card"}"#);
        let cash = write_temp_file(&dir, "cash.json", r#"{"kind": "cash", "number": "1"}"#);
        let ok = write_temp_file(&dir, "ok.json", r#"{"kind": "card", "number": "1"}"#);

        for (payload, expected) in [(&card, 1), (&cash, 1), (&ok, 0)] {
            cmd()
                .args([
                    "validate",
                    payload.to_str().unwrap(),
                    "--schema",
                    schema.to_str().unwrap(),
                ])
                .assert()
                .code(expected);
        }
    }
}

mod check_command {
    use super::*;

    #[test]
    fn valid_description() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", PERSON);

        cmd()
            .args(["check", schema.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("Schema OK (object)"));
    }

    #[test]
    fn literal_description() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", r#"["a", "b"]"#);

        cmd()
            .args(["check", schema.to_str().unwrap(), "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""valid":true"#));
    }

    #[test]
    fn invalid_description() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{"type": "number", "flags": {"presence": "sometimes"}}"#,
        );

        cmd()
            .args(["check", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid description at flags"));
    }

    #[test]
    fn circular_keys() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{
                "type": "object",
                "keys": {
                    "a": { "type": "number", "rules": [{ "name": "min", "args": { "limit": { "$ref": "b" } } }] },
                    "b": { "type": "number", "rules": [{ "name": "min", "args": { "limit": { "$ref": "a" } } }] }
                }
            }"#,
        );

        cmd()
            .args(["check", schema.to_str().unwrap(), "--json"])
            .assert()
            .code(2)
            .stdout(predicate::str::contains(r#""valid":false"#));
    }
}

mod error_handling {
    use super::*;

    #[test]
    fn missing_payload() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", PERSON);

        cmd()
            .args([
                "validate",
                "/nonexistent/payload.json",
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("loading payload"));
    }

    #[test]
    fn missing_schema() {
        cmd()
            .args(["check", "/nonexistent/schema.json"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("file not found"));
    }

    #[test]
    fn malformed_payload() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", PERSON);
        let payload = write_temp_file(&dir, "payload.json", "{not json");

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid JSON"));
    }

    #[test]
    fn invalid_prefs() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", PERSON);
        let payload = write_temp_file(&dir, "payload.json", r#"{"name": "Ada"}"#);
        let prefs = write_temp_file(&dir, "prefs.json", r#"{"convert": "yes"}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--prefs",
                prefs.to_str().unwrap(),
            ])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid preferences"));
    }

    #[test]
    fn json_mode_reports_errors_on_stdout() {
        cmd()
            .args(["check", "/nonexistent/schema.json", "--json"])
            .assert()
            .code(3)
            .stdout(predicate::str::contains(r#""error":"loading schema"#));
    }
}

mod required_args {
    use super::*;

    #[test]
    fn validate_requires_schema() {
        cmd()
            .args(["validate", "payload.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--schema"));
    }

    #[test]
    fn no_subcommand() {
        cmd().assert().failure();
    }
}

mod help_and_version {
    use super::*;

    #[test]
    fn help() {
        cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("validate"))
            .stdout(predicate::str::contains("check"));
    }

    #[test]
    fn version() {
        cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("sieve"));
    }
}

#[cfg(feature = "remote")]
mod remote {
    use super::*;

    #[test]
    fn schema_from_url() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/person.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(PERSON)
            .create();

        let dir = TempDir::new().unwrap();
        let payload = write_temp_file(&dir, "payload.json", r#"{"name": "Ada"}"#);

        cmd()
            .args([
                "validate",
                payload.to_str().unwrap(),
                "--schema",
                &format!("{}/person.json", server.url()),
            ])
            .assert()
            .success();
    }

    #[test]
    fn schema_url_not_found() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("GET", "/missing.json").with_status(404).create();

        cmd()
            .args(["check", &format!("{}/missing.json", server.url())])
            .assert()
            .code(3);
    }
}
