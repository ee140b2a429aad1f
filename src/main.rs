use clap::Parser;
use docker_image_syncer::cli::{Args, Runner};
use docker_image_syncer::logging::{format_from_env, init_tracing};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let format = match format_from_env() {
        Ok(format) => format,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_tracing(args.verbose, args.quiet, format) {
        eprintln!("⚠️ {}", e);
    }

    let runner = match Runner::new(args) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runner.run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}
