use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = gatemcp_cli::Cli::parse();
    if let Err(e) = gatemcp_cli::run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
