#[tokio::main]
async fn main() {
    if let Err(err) = omnik_bridge::app().await {
        eprintln!("omnik-bridge: {:?}", err);
        std::process::exit(255);
    }
}
