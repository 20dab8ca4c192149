use clap::Parser;
use nahma::config::exit_code;
use nahma::{Config, Supervisor};

#[tokio::main]
async fn main() {
    let config = Config::parse();
    let code = run(config).await;
    std::process::exit(code);
}

async fn run(config: Config) -> i32 {
    let supervisor = match Supervisor::start(config).await {
        Ok(supervisor) => supervisor,
        Err(err) => {
            eprintln!("failed to start: {err:#}");
            return exit_code::INFRASTRUCTURE;
        }
    };

    let mut events = supervisor.events().await.expect("events stream taken once");
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(?event, "supervisor event");
        }
    });

    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install ctrl-c handler; shutting down anyway");
    }

    match supervisor.shutdown().await {
        Ok(()) => exit_code::CLEAN,
        Err(err) => {
            eprintln!("shutdown failed: {err:#}");
            exit_code::TEST_FAILURE
        }
    }
}
