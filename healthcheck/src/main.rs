mod host;

#[tokio::main]
async fn main() {
    let code = host::run().await;
    std::process::exit(code);
}
