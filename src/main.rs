use std::process::ExitCode;

use clap::Parser;
use gcp2aws::cli::{self, Args};

#[tokio::main]
pub async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    gcp2aws::logging::init(args.verbose);

    match cli::until_interrupted(cli::run(args), tokio::signal::ctrl_c()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gcp2aws: {}", e);
            ExitCode::FAILURE
        }
    }
}
