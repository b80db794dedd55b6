use docker_registry_mirror::cli::{Args, Runner};

#[tokio::main]
async fn main() {
    let args = Args::parse_args();

    let result = match Runner::new(args) {
        Ok(runner) => runner.run().await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
