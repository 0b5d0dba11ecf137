#[tokio::main]
async fn main() {
    if let Err(err) = paps_calculator::cli::run().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}
