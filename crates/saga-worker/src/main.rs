//! saga - episodic character memory from the command line.

use std::process::ExitCode;

use clap::Parser;
use saga_worker::{init_tracing, run, Args};

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.log_json);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = ?e, "saga failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
