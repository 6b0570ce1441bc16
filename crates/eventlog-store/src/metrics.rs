//! Prometheus gauges for the event log store
//!
//! [`StoreMetrics`] is a pull-based collector: values are read from the store
//! each time the registry gathers, so nothing on the ingest path touches
//! prometheus.

use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, Opts};

use crate::error::StoreResult;
use crate::store::StoreShared;

const BARREL_COUNT_NAME: &str = "container_log_store_cache_barrel_count";
const BARREL_COUNT_HELP: &str = "the cache container log barrel size.";
const LOG_COUNT_NAME: &str = "container_log_store_log_count";
const LOG_COUNT_HELP: &str = "the handle container log count size.";

/// Collector exposing the live barrel count and cumulative message count
pub struct StoreMetrics {
    shared: Arc<StoreShared>,
    barrel_count: Gauge,
    log_count: Gauge,
}

impl StoreMetrics {
    pub(crate) fn new(
        shared: Arc<StoreShared>,
        namespace: &str,
        subsystem: &str,
        from: &str,
    ) -> StoreResult<Self> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .namespace(namespace)
                .subsystem(subsystem)
                .const_label("from", from)
        };

        Ok(Self {
            shared,
            barrel_count: Gauge::with_opts(opts(BARREL_COUNT_NAME, BARREL_COUNT_HELP))?,
            log_count: Gauge::with_opts(opts(LOG_COUNT_NAME, LOG_COUNT_HELP))?,
        })
    }
}

impl Collector for StoreMetrics {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = self.barrel_count.desc();
        descs.extend(self.log_count.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.barrel_count.set(self.shared.barrel_count() as f64);
        self.log_count.set(self.shared.all_log_count() as f64);

        let mut families = self.barrel_count.collect();
        families.extend(self.log_count.collect());
        families
    }
}
