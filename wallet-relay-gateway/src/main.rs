use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    wallet_relay_gateway::run().await?;
    Ok(())
}
