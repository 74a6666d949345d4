mod cli;
mod completions;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    cli::dispatch::run().await
}
