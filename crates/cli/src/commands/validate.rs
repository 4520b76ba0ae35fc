//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::AggregationBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    resource_count: usize,
    record_count: usize,
    rounds: u32,
    mode: String,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    resource_count: blueprint.resources.len(),
                    record_count: blueprint.resources.iter().map(|r| r.records.len()).sum(),
                    rounds: blueprint.rounds,
                    mode: format!("{:?}", blueprint.dispatch.mode),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &AggregationBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    for resource in &blueprint.resources {
        if resource.fail {
            warnings.push(format!(
                "Resource '{}' always fails - it will always be delivered as []",
                resource.key
            ));
        }
        if resource.panic {
            warnings.push(format!(
                "Resource '{}' always panics - it will always be delivered as []",
                resource.key
            ));
        }
        if let Some(timeout_ms) = blueprint.dispatch.fetch_timeout_ms {
            if resource.delay_ms >= timeout_ms {
                warnings.push(format!(
                    "Resource '{}' delay ({} ms) reaches fetch timeout ({} ms) - it will time out",
                    resource.key, resource.delay_ms, timeout_ms
                ));
            }
        }
    }

    if let Some(max) = blueprint.dispatch.max_concurrency {
        if max >= blueprint.resources.len() {
            warnings.push(format!(
                "dispatch.max_concurrency ({}) is not below the resource count - the cap has no effect",
                max
            ));
        }
    }

    if !blueprint.aggregator.replay_latest {
        warnings.push(
            "aggregator.replay_latest is off - late subscribers miss the current snapshot"
                .to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Resources: {}", summary.resource_count);
            println!("  Scripted records: {}", summary.record_count);
            println!("  Rounds: {}", summary.rounds);
            println!("  Mode: {}", summary.mode);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_valid_config_with_warnings() {
        let file = write_config(
            r#"
[dispatch]
fetch_timeout_ms = 100
max_concurrency = 8

[[resources]]
key = "allergies"
records = ["peanut", "latex"]

[[resources]]
key = "labs"
delay_ms = 500
"#,
        );
        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        };

        let result = validate_config(&args);

        assert!(result.valid);
        let summary = result.summary.unwrap();
        assert_eq!(summary.resource_count, 2);
        assert_eq!(summary.record_count, 2);
        let warnings = result.warnings.unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("'labs'"));
        assert!(warnings[1].contains("max_concurrency"));
    }

    #[test]
    fn test_invalid_config_reports_error() {
        let file = write_config(
            r#"
[[resources]]
key = "labs"

[[resources]]
key = "labs"
"#,
        );
        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: false,
        };

        let result = validate_config(&args);

        assert!(!result.valid);
        assert!(result.error.unwrap().contains("duplicate resource key"));
        assert!(run_validate(&args).is_err());
    }

    #[test]
    fn test_missing_file() {
        let args = ValidateArgs {
            config: "does/not/exist.toml".into(),
            json: true,
        };

        let result = validate_config(&args);

        assert!(!result.valid);
        assert!(result.error.unwrap().starts_with("File not found"));
    }
}
