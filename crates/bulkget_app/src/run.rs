use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use bulkget_core::{parse_locator_list, RunSummary};
use bulkget_engine::{BulkFetcher, HttpStore};
use bulkget_logging::{bulk_debug, bulk_info};
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;

/// Read the locator list, run the retrieval and summarize it.
///
/// Setup problems (unreadable list, bad locator, bad configuration) are
/// errors; a run that starts and then fails is reported in the summary.
pub async fn execute(cli: &Cli, cancel: &CancellationToken) -> anyhow::Result<RunSummary> {
    let text = tokio::fs::read_to_string(&cli.files)
        .await
        .with_context(|| format!("reading locator list {}", cli.files.display()))?;
    let locators = parse_locator_list(&text).context("parsing locator list")?;

    let store = HttpStore::new(cli.store_settings()?, cli.signer()?)?;
    bulk_debug!("object store endpoint {}", store.settings().endpoint);
    let fetcher = BulkFetcher::new(Arc::new(store), cli.engine_config())?;
    let config = fetcher.config();

    let job_count = locators.len();
    let started = Instant::now();
    let outcome = fetcher.fetch_all_until(locators, cancel).await;
    let elapsed = started.elapsed();

    let digest = outcome.digest();
    let summary = match (outcome.error, digest) {
        (None, Some(digest)) => {
            RunSummary::succeeded(elapsed, job_count, config.strategy, config.workers, digest)
        }
        (Some(err), _) => {
            RunSummary::failed(elapsed, job_count, config.strategy, config.workers, err)
        }
        (None, None) => RunSummary::failed(
            elapsed,
            job_count,
            config.strategy,
            config.workers,
            "run finished with missing payloads",
        ),
    };
    bulk_info!("{}", summary);
    Ok(summary)
}
