#[tokio::main]
async fn main() {
    std::process::exit(novm_lib::run().await)
}
