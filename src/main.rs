use std::process::ExitCode;
use verif_matrix::cli;

#[tokio::main]
async fn main() -> ExitCode {
    ExitCode::from(cli::run().await)
}
