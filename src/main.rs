#[tokio::main]
async fn main() -> anyhow::Result<()> {
    echotrail_lib::run().await
}
