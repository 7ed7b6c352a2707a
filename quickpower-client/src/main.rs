use clap::Parser;
use quickpower_client::{Cli, run};

#[tokio::main]
async fn main() -> Result<(), quickpower_client::AppError> {
    run(Cli::parse()).await
}
