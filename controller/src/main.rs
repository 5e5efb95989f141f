mod connection;
mod geo;
mod health;
mod host;
mod scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
