//! Sieve CLI
//!
//! Command-line interface for validating JSON payloads against schema
//! descriptions.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;
use sieve::{build, load_auto, load_json, Preferences, Schema, ValidationError};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sieve")]
#[command(about = "Validate JSON values against declarative schemas")]
#[command(version)]
struct Cli {
    /// Log debug events to stderr (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a payload against a schema description
    Validate {
        /// Payload file to validate
        payload: PathBuf,

        /// Schema description: file path or URL (http:// or https://)
        #[arg(long, short)]
        schema: String,

        /// Context document resolved by `$` references
        #[arg(long)]
        context: Option<String>,

        /// Preferences file (JSON object, e.g. {"stripUnknown": true})
        #[arg(long)]
        prefs: Option<String>,

        /// Report every error instead of stopping at the first
        #[arg(long)]
        all_errors: bool,

        /// Disable type conversion
        #[arg(long)]
        no_convert: bool,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Check that a schema description builds
    Check {
        /// Schema description: file path or URL (http:// or https://)
        schema: String,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Validate {
            payload,
            schema,
            context,
            prefs,
            all_errors,
            no_convert,
            json,
            pretty,
        } => run_validate(ValidateArgs {
            payload,
            schema,
            context,
            prefs,
            all_errors,
            no_convert,
            json_output: json,
            pretty,
        }),

        Commands::Check { schema, json } => run_check(&schema, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load and build a schema description.
fn load_schema(source: &str, json_output: bool) -> Result<Schema, u8> {
    let description = load_auto(source).map_err(|e| {
        report_error(json_output, &format!("loading schema: {}", e));
        e.exit_code() as u8
    })?;
    build(&description).map_err(|e| {
        report_error(json_output, &format!("invalid schema: {}", e));
        2
    })
}

struct ValidateArgs {
    payload: PathBuf,
    schema: String,
    context: Option<String>,
    prefs: Option<String>,
    all_errors: bool,
    no_convert: bool,
    json_output: bool,
    pretty: bool,
}

fn run_validate(args: ValidateArgs) -> Result<(), u8> {
    let ValidateArgs {
        payload: payload_path,
        schema: schema_source,
        context,
        prefs: prefs_source,
        all_errors,
        no_convert,
        json_output,
        pretty,
    } = args;

    let payload = load_json(&payload_path).map_err(|e| {
        report_error(json_output, &format!("loading payload: {}", e));
        e.exit_code() as u8
    })?;

    let schema = load_schema(&schema_source, json_output)?;

    let mut prefs = match &prefs_source {
        Some(source) => {
            let document = load_auto(source).map_err(|e| {
                report_error(json_output, &format!("loading preferences: {}", e));
                e.exit_code() as u8
            })?;
            Preferences::from_json(&document).map_err(|e| {
                report_error(json_output, &format!("invalid preferences: {}", e));
                2u8
            })?
        }
        None => Preferences::default(),
    };
    if let Some(source) = &context {
        let document = load_auto(source).map_err(|e| {
            report_error(json_output, &format!("loading context: {}", e));
            e.exit_code() as u8
        })?;
        prefs = prefs.context(document);
    }
    if all_errors {
        prefs = prefs.abort_early(false);
    }
    if no_convert {
        prefs = prefs.convert(false);
    }
    debug!(payload = %payload_path.display(), schema = %schema_source, "validating");

    let validation = schema.validate_with(Some(&payload), &prefs).map_err(|e| {
        report_error(json_output, &format!("schema error: {}", e));
        2u8
    })?;

    match validation.error {
        None => {
            let value = validation.value.unwrap_or(Value::Null);
            let output = if json_output {
                serde_json::json!({ "valid": true, "value": value })
            } else {
                value
            };
            print_json(&output, pretty)
        }
        Some(error) => {
            if json_output {
                let output = match &error {
                    ValidationError::Details { details, .. } => {
                        serde_json::json!({ "valid": false, "errors": details })
                    }
                    ValidationError::Custom(custom) => {
                        serde_json::json!({ "valid": false, "error": custom.to_string() })
                    }
                };
                print_json(&output, pretty)?;
            } else {
                eprintln!("Validation failed:");
                match error.details() {
                    Some(details) => {
                        for detail in details {
                            eprintln!("  {}", detail);
                        }
                    }
                    None => eprintln!("  {}", error),
                }
            }
            Err(1)
        }
    }
}

fn run_check(source: &str, json_output: bool) -> Result<(), u8> {
    let schema = load_schema(source, json_output)?;
    if json_output {
        println!(
            "{}",
            serde_json::json!({ "valid": true, "type": schema.type_name() })
        );
    } else {
        println!("Schema OK ({})", schema.type_name());
    }
    Ok(())
}

fn print_json(value: &Value, pretty: bool) -> Result<(), u8> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", rendered);
    Ok(())
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}
