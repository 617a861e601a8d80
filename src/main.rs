use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    activity_feed::cli::run().await
}
