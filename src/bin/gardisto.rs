use anyhow::Result;
use gardisto::cli::start;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse arguments and initialize logging
    let action = start()?;

    // Handle the action
    action.execute().await
}
