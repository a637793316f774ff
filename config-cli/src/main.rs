use clap::Parser;
use ganesha_config::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let exit_code = ganesha_config::run_main(cli)?;
    std::process::exit(exit_code);
}
