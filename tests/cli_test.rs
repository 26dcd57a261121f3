//! CLI integration tests for the spec-gate binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("spec-gate"))
}

// Helper to create a temp input file
fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

const SCHEMAS: &str = r#"{
    "Pet": {
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "owner": { "$ref": "{Owner}" },
            "nickname": { "x-nullable": { "type": "string" } }
        },
        "required": ["name"]
    },
    "Owner": {
        "type": "object",
        "properties": { "email": { "type": "string", "x-validator": "email" } }
    }
}"#;

mod compile_command {
    use super::*;

    #[test]
    fn documentation_dialect() {
        let dir = TempDir::new().unwrap();
        let schemas = write_temp_file(&dir, "schemas.json", SCHEMAS);

        cmd()
            .args(["compile", schemas.to_str().unwrap(), "--dialect", "documentation"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                r##""$ref":"#/components/schemas/Owner""##,
            ))
            .stdout(predicate::str::contains(r#""nullable":true"#))
            .stdout(predicate::str::contains("x-validator").not());
    }

    #[test]
    fn validation_dialect() {
        let dir = TempDir::new().unwrap();
        let schemas = write_temp_file(&dir, "schemas.json", SCHEMAS);

        cmd()
            .args(["compile", schemas.to_str().unwrap(), "--dialect", "validation"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r##""$ref":"#/$defs/Owner""##))
            .stdout(predicate::str::contains(r#""anyOf":[{"type":"string"},{"type":"null"}]"#))
            .stdout(predicate::str::contains(r#""x-validator":"email""#));
    }

    #[test]
    fn single_schema_by_name() {
        let dir = TempDir::new().unwrap();
        let schemas = write_temp_file(&dir, "schemas.json", SCHEMAS);

        cmd()
            .args([
                "compile",
                schemas.to_str().unwrap(),
                "--dialect",
                "validation",
                "--name",
                "Owner",
            ])
            .assert()
            .success()
            .stdout(predicate::str::starts_with(r#"{"type":"object""#));
    }

    #[test]
    fn unknown_name_fails() {
        let dir = TempDir::new().unwrap();
        let schemas = write_temp_file(&dir, "schemas.json", SCHEMAS);

        cmd()
            .args(["compile", schemas.to_str().unwrap(), "--name", "Nope"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("Nope"));
    }

    #[test]
    fn pretty_output() {
        let dir = TempDir::new().unwrap();
        let schemas = write_temp_file(&dir, "schemas.json", SCHEMAS);

        cmd()
            .args(["compile", schemas.to_str().unwrap(), "--pretty"])
            .assert()
            .success()
            // Pretty output has newlines and indentation
            .stdout(predicate::str::contains("{\n"));
    }

    #[test]
    fn output_file() {
        let dir = TempDir::new().unwrap();
        let schemas = write_temp_file(&dir, "schemas.json", SCHEMAS);
        let output = dir.path().join("out.json");

        cmd()
            .args([
                "compile",
                schemas.to_str().unwrap(),
                "--output",
                output.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::is_empty());

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert!(written.get("Pet").is_some());
        assert!(written.get("Owner").is_some());
    }

    #[test]
    fn invalid_dialect_rejected() {
        let dir = TempDir::new().unwrap();
        let schemas = write_temp_file(&dir, "schemas.json", SCHEMAS);

        cmd()
            .args(["compile", schemas.to_str().unwrap(), "--dialect", "yaml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown dialect"));
    }

    #[test]
    fn file_not_found_exit_code() {
        cmd()
            .args(["compile", "/nonexistent/schemas.json"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("file not found"));
    }

    #[test]
    fn invalid_json_exit_code() {
        let dir = TempDir::new().unwrap();
        let schemas = write_temp_file(&dir, "schemas.json", "not json");

        cmd()
            .args(["compile", schemas.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid JSON"));
    }

    #[test]
    fn loads_schemas_from_url() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/schemas.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(SCHEMAS)
            .create();

        cmd()
            .args(["compile", &format!("{}/schemas.json", server.url())])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                r##""$ref":"#/components/schemas/Owner""##,
            ));
        mock.assert();
    }

    #[test]
    fn url_error_status_exit_code() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("GET", "/missing.json").with_status(404).create();

        cmd()
            .args(["compile", &format!("{}/missing.json", server.url())])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("failed to fetch"));
    }
}

mod check_command {
    use super::*;

    const VALID: &str = r##"{
        "openapi": "3.0.3",
        "info": { "title": "Pets", "version": "1.0.0" },
        "paths": {
            "/pets/{id}": {
                "get": {
                    "operationId": "getPet",
                    "parameters": [
                        { "name": "id", "in": "path", "required": true, "schema": { "type": "number" } }
                    ],
                    "responses": {
                        "200": {
                            "description": "A pet",
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/Pet" }
                                }
                            }
                        }
                    }
                }
            }
        },
        "components": { "schemas": { "Pet": { "type": "object" } } }
    }"##;

    #[test]
    fn valid_document() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", VALID);

        cmd()
            .args(["check", doc.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("Valid"));
    }

    #[test]
    fn missing_reference_reported() {
        let dir = TempDir::new().unwrap();
        let broken = VALID.replace("schemas/Pet\"", "schemas/Cat\"");
        let doc = write_temp_file(&dir, "openapi.json", &broken);

        cmd()
            .args(["check", doc.to_str().unwrap()])
            .assert()
            .code(1)
            .stderr(predicate::str::contains(
                "missing reference: #/components/schemas/Cat",
            ));
    }

    #[test]
    fn json_output() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(
            &dir,
            "openapi.json",
            r#"{ "openapi": "3.0.3", "paths": {} }"#,
        );

        cmd()
            .args(["check", doc.to_str().unwrap(), "--json"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains(r#""valid":false"#));
    }

    #[test]
    fn json_output_for_load_error() {
        cmd()
            .args(["check", "/nonexistent/openapi.json", "--json"])
            .assert()
            .code(3)
            .stdout(predicate::str::contains(r#""valid":false"#));
    }
}
