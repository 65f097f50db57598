use clap::{Parser, Subcommand, ValueEnum};
use doc_engine::{
    Change, Document, DocumentSession, EngineOptions, ValidationResult, build_render_payload,
    render_json_ui, render_text,
};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Form document CLI",
    long_about = "Resolves formulas, applies changes and validates form documents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RenderMode {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Print a summary of the document with formulas and logic applied.
    Render {
        /// Path to the document JSON.
        #[arg(long, value_name = "DOCUMENT")]
        document: PathBuf,
        /// Model view whose pages should be listed (e.g. mobile).
        #[arg(long)]
        view: Option<String>,
        #[arg(long, value_enum, default_value_t = RenderMode::Text)]
        format: RenderMode,
    },
    /// Print the document with every formula result written into its field.
    Resolve {
        /// Path to the document JSON.
        #[arg(long, value_name = "DOCUMENT")]
        document: PathBuf,
        /// Write the resolved document here instead of stdout.
        #[arg(long, value_name = "OUT")]
        out: Option<PathBuf>,
    },
    /// Apply a change (or an array of changes) and print the changelog.
    Apply {
        /// Path to the document JSON.
        #[arg(long, value_name = "DOCUMENT")]
        document: PathBuf,
        /// Path to the change JSON.
        #[arg(long, value_name = "CHANGES")]
        changes: PathBuf,
        /// Write the updated document here.
        #[arg(long, value_name = "OUT")]
        out: Option<PathBuf>,
        /// Accept values that do not match their field type.
        #[arg(long)]
        no_schema_check: bool,
    },
    /// Validate required fields, choices and identifiers.
    Validate {
        /// Path to the document JSON.
        #[arg(long, value_name = "DOCUMENT")]
        document: PathBuf,
    },
    /// Print the JSON schema of the document model.
    Schema,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Render {
            document,
            view,
            format,
        } => run_render(document, view, format),
        Command::Resolve { document, out } => run_resolve(document, out),
        Command::Apply {
            document,
            changes,
            out,
            no_schema_check,
        } => run_apply(document, changes, out, no_schema_check),
        Command::Validate { document } => run_validate(document),
        Command::Schema => run_schema(),
    }
}

fn open_session(path: &Path, options: EngineOptions) -> CliResult<DocumentSession> {
    let text = fs::read_to_string(path)?;
    let document = Document::from_json(&text)?;
    info!(document = %document.id, fields = document.fields.len(), "loaded document");
    Ok(DocumentSession::new(document, options)?)
}

fn write_json(value: &impl serde::Serialize, out: Option<&Path>) -> CliResult<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            fs::write(path, format!("{rendered}\n"))?;
            println!("Wrote {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn run_render(path: PathBuf, view: Option<String>, format: RenderMode) -> CliResult<()> {
    let options = EngineOptions {
        view,
        ..EngineOptions::default()
    };
    let mut session = open_session(&path, options)?;
    let payload = build_render_payload(&mut session);
    match format {
        RenderMode::Text => println!("{}", render_text(&payload)),
        RenderMode::Json => println!("{}", serde_json::to_string_pretty(&render_json_ui(&payload))?),
    }
    Ok(())
}

fn run_resolve(path: PathBuf, out: Option<PathBuf>) -> CliResult<()> {
    let mut session = open_session(&path, EngineOptions::default())?;
    let resolved = session.resolved_document();
    write_json(&resolved, out.as_deref())
}

fn read_changes(path: &Path) -> CliResult<Vec<Change>> {
    let raw: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    Ok(match raw {
        Value::Array(_) => serde_json::from_value(raw)?,
        other => vec![serde_json::from_value(other)?],
    })
}

fn run_apply(
    path: PathBuf,
    changes_path: PathBuf,
    out: Option<PathBuf>,
    no_schema_check: bool,
) -> CliResult<()> {
    let options = EngineOptions {
        validate_schema: !no_schema_check,
        ..EngineOptions::default()
    };
    let mut session = open_session(&path, options)?;
    let changes = read_changes(&changes_path)?;
    let outcome = session.apply_changes(changes)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "changelog": outcome.changelog,
            "invalidated": outcome.invalidated,
            "visibility_changes": outcome.visibility_changes,
        }))?
    );
    if let Some(out) = out {
        write_json(session.document(), Some(out.as_path()))?;
    }
    Ok(())
}

fn run_validate(path: PathBuf) -> CliResult<()> {
    let mut session = open_session(&path, EngineOptions::default())?;
    let result = session.validate();
    println!(
        "Validation result: {}",
        if result.valid { "valid" } else { "invalid" }
    );
    describe_validation(&result);

    if result.valid {
        Ok(())
    } else {
        Err("validation failed".into())
    }
}

fn describe_validation(result: &ValidationResult) {
    if !result.errors.is_empty() {
        println!("Errors:");
        for error in &result.errors {
            println!(
                "  {} - {}",
                error.path.as_deref().unwrap_or("<unknown>"),
                error.message
            );
        }
    }
    if !result.missing_required.is_empty() {
        println!(
            "Missing required fields: {}",
            result.missing_required.join(", ")
        );
    }
}

fn run_schema() -> CliResult<()> {
    let schema = schemars::schema_for!(Document);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use serde_json::{Value, json};
    use std::fs;

    const SIMPLE: &str = include_str!("../../doc-engine/tests/fixtures/simple_document.json");

    fn workspace() -> Result<TempDir, Box<dyn std::error::Error>> {
        let temp = TempDir::new()?;
        temp.child("document.json").write_str(SIMPLE)?;
        Ok(temp)
    }

    #[test]
    fn validate_reports_valid_document() -> Result<(), Box<dyn std::error::Error>> {
        let temp = workspace()?;
        let output = Command::cargo_bin("docform")?
            .arg("validate")
            .arg("--document")
            .arg(temp.child("document.json").path())
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        assert!(String::from_utf8(output)?.contains("Validation result: valid"));
        Ok(())
    }

    #[test]
    fn validate_fails_on_missing_required() -> Result<(), Box<dyn std::error::Error>> {
        let temp = TempDir::new()?;
        let mut document: Value = serde_json::from_str(SIMPLE)?;
        document["fields"][0]["value"] = json!("");
        temp.child("document.json")
            .write_str(&document.to_string())?;

        let output = Command::cargo_bin("docform")?
            .arg("validate")
            .arg("--document")
            .arg(temp.child("document.json").path())
            .assert()
            .failure()
            .get_output()
            .stdout
            .clone();
        let stdout = String::from_utf8(output)?;
        assert!(stdout.contains("Validation result: invalid"));
        assert!(stdout.contains("Missing required fields: field_site"));
        Ok(())
    }

    #[test]
    fn resolve_writes_formula_results() -> Result<(), Box<dyn std::error::Error>> {
        let temp = workspace()?;
        let out = temp.child("resolved.json");
        Command::cargo_bin("docform")?
            .arg("resolve")
            .arg("--document")
            .arg(temp.child("document.json").path())
            .arg("--out")
            .arg(out.path())
            .assert()
            .success();

        let resolved: Value = serde_json::from_str(&fs::read_to_string(out.path())?)?;
        let total = resolved["fields"]
            .as_array()
            .and_then(|fields| fields.iter().find(|field| field["_id"] == "field_total"))
            .cloned()
            .unwrap_or(Value::Null);
        assert_eq!(total["value"], json!(50));
        Ok(())
    }

    #[test]
    fn apply_updates_document_and_prints_changelog() -> Result<(), Box<dyn std::error::Error>> {
        let temp = workspace()?;
        temp.child("changes.json").write_str(
            &json!([{
                "target": "field.value.rowUpdate",
                "fieldId": "field_items",
                "rowId": "row_1",
                "change": { "row": { "cells": { "col_qty": 60 } } }
            }])
            .to_string(),
        )?;
        let out = temp.child("updated.json");
        let output = Command::cargo_bin("docform")?
            .arg("apply")
            .arg("--document")
            .arg(temp.child("document.json").path())
            .arg("--changes")
            .arg(temp.child("changes.json").path())
            .arg("--out")
            .arg(out.path())
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let stdout = String::from_utf8(output)?;
        assert!(stdout.contains("\"invalidated\""));
        assert!(stdout.contains("field_total"));
        assert!(stdout.contains("page_followup"));

        let updated: Value = serde_json::from_str(&fs::read_to_string(out.path())?)?;
        assert_eq!(updated["fields"][3]["value"][0]["cells"]["col_qty"], json!(60));
        Ok(())
    }

    #[test]
    fn apply_rejects_unknown_field() -> Result<(), Box<dyn std::error::Error>> {
        let temp = workspace()?;
        temp.child("changes.json").write_str(
            &json!({ "target": "field.update", "fieldId": "ghost", "change": { "value": 1 } })
                .to_string(),
        )?;
        Command::cargo_bin("docform")?
            .arg("apply")
            .arg("--document")
            .arg(temp.child("document.json").path())
            .arg("--changes")
            .arg(temp.child("changes.json").path())
            .assert()
            .failure();
        Ok(())
    }

    #[test]
    fn render_text_lists_visible_fields() -> Result<(), Box<dyn std::error::Error>> {
        let temp = workspace()?;
        let output = Command::cargo_bin("docform")?
            .arg("render")
            .arg("--document")
            .arg(temp.child("document.json").path())
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let stdout = String::from_utf8(output)?;
        assert!(stdout.contains("Document: Site Inspection"));
        assert!(stdout.contains("Total price (number) = 50"));
        assert!(!stdout.contains("Follow up"));
        Ok(())
    }

    #[test]
    fn schema_prints_document_schema() -> Result<(), Box<dyn std::error::Error>> {
        let output = Command::cargo_bin("docform")?
            .arg("schema")
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let schema: Value = serde_json::from_slice(&output)?;
        assert_eq!(schema["title"], "Document");
        Ok(())
    }
}
