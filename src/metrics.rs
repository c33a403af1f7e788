use anyhow::Context as _;
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and describe the ingest series.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe();
        Ok(Self { handle })
    }
}

fn describe() {
    describe_counter!("ingest_fetch_total", "Source fetch attempts");
    describe_counter!("ingest_fetch_errors_total", "Source fetches that failed after retries");
    describe_counter!("ingest_items_total", "Raw items returned by fetchers");
    describe_counter!("ingest_matched_total", "Items that matched a keyword or were exempt");
    describe_counter!("ingest_inserted_total", "Mentions written to the store");
    describe_counter!("ingest_duplicates_total", "Mentions skipped as already stored");
    describe_counter!("ingest_rejected_total", "Mentions rejected by validation");
    describe_histogram!("ingest_fetch_ms", Unit::Milliseconds, "Per-source fetch latency");
    describe_gauge!("ingest_last_tick_ts", Unit::Seconds, "Unix time of the last finished poll tick");
}
