use anyhow::Result;
use lumentip_cli::app;

#[tokio::main]
async fn main() -> Result<()> {
    app::run().await
}
