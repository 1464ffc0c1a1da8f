//! Config validation CLI tool
//!
//! Checks a rollcalld configuration file and prints the effective settings.

use rollcall_config::{load_config, ConfigError, CURRENT_CONFIG_VERSION};
use rollcall_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let config_path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a rollcalld configuration file.");
            eprintln!("The default location is {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    let policy = match load_config(&config_path) {
        Ok(policy) => policy,
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => eprintln!("Failed to read file: {}", io_err),
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => eprintln!(
                    "Unsupported config version: {} (expected {})",
                    ver, CURRENT_CONFIG_VERSION
                ),
            }
            return ExitCode::from(1);
        }
    };

    println!("✓ Configuration is valid");
    println!();
    println!("Attendance:");
    println!("  tolerance:    {} min", policy.attendance.tolerance_minutes);
    println!("  QR validity:  {} min", policy.attendance.qr_validity_minutes);
    println!("Booking:");
    println!("  default:      {} min", policy.booking.default_duration_minutes);
    println!("  maximum:      {} min", policy.booking.max_duration_minutes);
    println!("  sweep every:  {} s", policy.service.sweep_interval.as_secs());

    if !policy.venues.is_empty() {
        println!();
        println!("Venues ({}):", policy.venues.len());
        for venue in &policy.venues {
            println!("  - {} (capacity {}): {}", venue.id, venue.capacity, venue.name);
        }
    }

    ExitCode::SUCCESS
}
