mod host;
mod light;
mod notify;
mod shell;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
