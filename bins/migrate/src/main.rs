#![forbid(unsafe_code)]

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tandem_storage::migrate().await?;
    println!("migrations complete");
    Ok(())
}
