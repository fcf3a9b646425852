#[tokio::main]
async fn main() -> anyhow::Result<()> {
    modelforge::bootstrapper::run().await
}
