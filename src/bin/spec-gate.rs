//! spec-gate CLI
//!
//! Compiles named schema files into either dialect and checks OpenAPI
//! documents for dangling references and structural problems.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use spec_gate::{
    load_document_auto, load_named_schemas, validate_document, Dialect, SpecError,
    SpecificationBuilder,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spec-gate")]
#[command(about = "Compile schemas and check OpenAPI documents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile named schemas into the documentation or validation dialect
    Compile {
        /// Named schemas: file path or URL (http:// or https://)
        schemas: String,

        /// Target dialect: documentation or validation
        #[arg(long, short, default_value = "documentation")]
        dialect: Dialect,

        /// Compile only this schema (default: all)
        #[arg(long)]
        name: Option<String>,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Check an OpenAPI document for missing references and structural errors
    Check {
        /// Document source: file path or URL
        document: String,

        /// Output the report as JSON (for automation)
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            schemas,
            dialect,
            name,
            output,
            pretty,
        } => run_compile(&schemas, dialect, name.as_deref(), output, pretty),
        Commands::Check { document, json } => run_check(&document, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn fail(e: SpecError) -> u8 {
    eprintln!("Error: {}", e);
    e.exit_code() as u8
}

fn run_compile(
    source: &str,
    dialect: Dialect,
    only: Option<&str>,
    output: Option<PathBuf>,
    pretty: bool,
) -> Result<(), u8> {
    let document = load_document_auto(source).map_err(fail)?;
    let schemas = load_named_schemas(&document).map_err(fail)?;

    if let Some(name) = only {
        if !schemas.iter().any(|(n, _)| n == name) {
            eprintln!("Error: no schema named \"{}\" in {}", name, source);
            return Err(2);
        }
    }

    let spec = schemas
        .iter()
        .fold(SpecificationBuilder::new("spec-gate", "0"), |builder, (name, schema)| {
            builder.schema(name.clone(), schema)
        })
        .build()
        .map_err(fail)?;

    let mut compiled = Map::new();
    for (name, schema) in &schemas {
        if only.is_some_and(|only| only != name) {
            continue;
        }
        let result = spec.compile(schema, dialect).map_err(fail)?;
        compiled.insert(name.clone(), result.value);
    }

    let value = match only {
        Some(name) => compiled.remove(name).unwrap_or(Value::Null),
        None => Value::Object(compiled),
    };

    let json_output = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

fn run_check(source: &str, json_output: bool) -> Result<(), u8> {
    let document = load_document_auto(source).map_err(|e| {
        if json_output {
            println!("{}", serde_json::json!({ "valid": false, "error": e.to_string() }));
        } else {
            eprintln!("Error: {}", e);
        }
        e.exit_code() as u8
    })?;

    let report = validate_document(&document);

    if json_output {
        println!("{}", serde_json::json!(report));
    } else if report.valid {
        println!("Valid");
    } else {
        eprintln!("Document check failed:");
        for reference in &report.missing_refs {
            eprintln!("  missing reference: {}", reference);
        }
        for error in &report.errors {
            eprintln!("  {}", error);
        }
    }

    if report.valid {
        Ok(())
    } else {
        Err(1)
    }
}
