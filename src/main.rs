//! torchat-control CLI application entry point.
//!
//! # Startup Flow
//!
//! ```text
//!   ┌──────────────────┐
//!   │  Parse CLI Args  │ ◄── clap parses command-line arguments
//!   └────────┬─────────┘
//!            │
//!            ▼
//!   ┌──────────────────┐       ┌─────────────────┐
//!   │ --generate_config│──────▶│ Write default   │────▶ Exit
//!   │    specified?    │       │ config & exit   │
//!   └────────┬─────────┘       └─────────────────┘
//!            │ No
//!            ▼
//!   ┌──────────────────┐
//!   │  Load Config     │ ◄── Defaults → File → CLI → hostname file
//!   └────────┬─────────┘
//!            │
//!            ▼
//!   ┌──────────────────┐
//!   │ Initialize       │
//!   │   Logging        │
//!   └────────┬─────────┘
//!            │
//!            ▼
//!   ┌──────────────────┐
//!   │ Accept Loop      │ ◄── server::run_main()
//!   └──────────────────┘
//! ```
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 1 | Error (see stderr for details) |
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `TORCHAT_CONFIG` | Path to config file (equivalent to `--config`) |
//! | `TORCHAT_SELF_ADDRESS` | Our hidden-service address (equivalent to `--self-address`) |

use clap::Parser;
use std::process::ExitCode;

use torchat_control::{config, logger, server, CliArgs, Config, LogLevel};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> torchat_control::Result<()> {
    let args = CliArgs::parse();

    if let Some(ref output_path) = args.generate_config {
        let config = Config::default();
        let toml = config.to_toml()?;
        std::fs::write(output_path, toml)?;
        println!("Wrote default config to {}", output_path.display());
        return Ok(());
    }

    let config = config::load_config(&args)?;

    logger::init(config.loglevel, config.logfile.as_deref())?;

    logger::plog(
        LogLevel::Notice,
        &format!("torchat-control {} starting", server::VERSION),
    );
    logger::plog(
        LogLevel::Debug,
        &format!("Listen address: {}:{}", config.listen_ip, config.listen_port),
    );
    if let Some(limit) = config.max_buddies {
        logger::plog(LogLevel::Info, &format!("Buddy list limited to {}", limit));
    }

    server::run_main(config).await
}
