use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    covtree_cli::main_entry().await
}
