use clap::Parser;
use ganesha_cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match ganesha_cli::run_main(cli).await {
        Ok(exit_code) => exit_code,
        Err(e) => {
            eprintln!("internal error: {e:#}");
            70
        }
    };
    std::process::exit(exit_code);
}
