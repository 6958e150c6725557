mod cli;
mod run;

use std::process::ExitCode;

use anyhow::Context;
use bulkget_logging::{bulk_error, bulk_warn};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    bulkget_logging::initialize(cli.log_destination(), cli.log_level());

    match run_app(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            bulk_error!("{:#}", err);
            eprintln!("bulkget: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_app(cli: Cli) -> anyhow::Result<bool> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    runtime.block_on(async {
        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                bulk_warn!("interrupted, cancelling run");
                interrupt.cancel();
            }
        });

        let summary = run::execute(&cli, &cancel).await?;
        if cli.json {
            println!("{}", serde_json::to_string(&summary)?);
        } else {
            println!("{summary}");
        }
        Ok(summary.is_success())
    })
}
