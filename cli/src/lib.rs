mod cli;
mod consent;
mod runner;

pub use cli::Cli;
pub use cli::Subcommand;
pub use runner::RunOutcome;
pub use runner::Runner;

use tracing_subscriber::EnvFilter;

/// Run the CLI and return the process exit code: 0 success, 1 user or
/// provider failure, 2 denied or manipulation detected.
pub async fn run_main(cli: Cli) -> anyhow::Result<i32> {
    let default_level = "error";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let runner = Runner::new(cli.cwd.clone(), cli.timeout)?;

    let outcome = match cli.command {
        Some(Subcommand::Rollback { session_id, auto }) => {
            runner.rollback(&session_id, auto).await?
        }
        Some(Subcommand::Status) => {
            runner.status().await?;
            return Ok(0);
        }
        None => {
            let Some(task) = cli.task.as_deref() else {
                eprintln!("no task given");
                return Ok(1);
            };
            runner.run_task(task, cli.auto).await?
        }
    };

    Ok(outcome.exit_code())
}
