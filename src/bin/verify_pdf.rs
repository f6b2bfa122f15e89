//! Verify the signatures embedded in a PDF
//!
//! Prints one JSON result per embedded signature. Exits with status 1 when
//! any signature fails, 2 on usage or read errors.
//!
//! Usage:
//!   cargo run --release --bin verify_pdf -- signed.pdf
//!   cargo run --release --bin verify_pdf -- signed.pdf --compact
//!
//! Set `RUST_LOG=debug` to see which revisions each signature is checked
//! against.

use pdf_signflow::signatures::SignatureVerifier;
use std::path::PathBuf;
use std::process::ExitCode;

struct VerifyConfig {
    input: PathBuf,
    compact: bool,
}

impl VerifyConfig {
    fn from_args() -> Option<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut input = None;
        let mut compact = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--compact" | "-c" => {
                    compact = true;
                },
                "--help" | "-h" => return None,
                other => {
                    input = Some(PathBuf::from(other));
                },
            }
            i += 1;
        }

        input.map(|input| Self { input, compact })
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let Some(config) = VerifyConfig::from_args() else {
        eprintln!("Usage: verify_pdf <file.pdf> [--compact]");
        return ExitCode::from(2);
    };

    let data = match std::fs::read(&config.input) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error reading {}: {}", config.input.display(), e);
            return ExitCode::from(2);
        },
    };

    let results = match SignatureVerifier::new().verify(&data) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("Error verifying {}: {}", config.input.display(), e);
            return ExitCode::from(2);
        },
    };

    let json = if config.compact {
        serde_json::to_string(&results)
    } else {
        serde_json::to_string_pretty(&results)
    };
    match json {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error encoding report: {}", e);
            return ExitCode::from(2);
        },
    }

    if results.is_empty() {
        eprintln!("{}: no embedded signatures", config.input.display());
        return ExitCode::from(1);
    }
    let failed = results.iter().filter(|r| !r.is_valid).count();
    if failed > 0 {
        eprintln!("{}: {} of {} signature(s) failed", config.input.display(), failed, results.len());
        return ExitCode::FAILURE;
    }
    eprintln!("{}: {} signature(s) valid", config.input.display(), results.len());
    ExitCode::SUCCESS
}
