use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_cycles_total: IntCounterVec,
    pub offers_sent_total: IntCounterVec,
    pub offer_cancellations_total: IntCounter,
    pub dispatch_latency_seconds: HistogramVec,
    pub pool_requests_total: IntCounterVec,
    pub pool_match_score: Histogram,
    pub ride_events_in_queue: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_cycles_total = IntCounterVec::new(
            Opts::new("dispatch_cycles_total", "Dispatch cycles by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_cycles_total metric");

        let offers_sent_total = IntCounterVec::new(
            Opts::new("offers_sent_total", "Ride offers pushed to drivers by outcome"),
            &["outcome"],
        )
        .expect("valid offers_sent_total metric");

        let offer_cancellations_total = IntCounter::new(
            "offer_cancellations_total",
            "Outstanding offers withdrawn after accept or cancel",
        )
        .expect("valid offer_cancellations_total metric");

        let dispatch_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of the immediate part of a dispatch cycle in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let pool_requests_total = IntCounterVec::new(
            Opts::new("pool_requests_total", "Pool requests by outcome"),
            &["outcome"],
        )
        .expect("valid pool_requests_total metric");

        let pool_match_score = Histogram::with_opts(
            HistogramOpts::new("pool_match_score", "Scores of evaluated pool candidates")
                .buckets(vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]),
        )
        .expect("valid pool_match_score metric");

        let ride_events_in_queue = IntGauge::new(
            "ride_events_in_queue",
            "Current number of ride lifecycle events waiting for dispatch",
        )
        .expect("valid ride_events_in_queue metric");

        registry
            .register(Box::new(dispatch_cycles_total.clone()))
            .expect("register dispatch_cycles_total");
        registry
            .register(Box::new(offers_sent_total.clone()))
            .expect("register offers_sent_total");
        registry
            .register(Box::new(offer_cancellations_total.clone()))
            .expect("register offer_cancellations_total");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(pool_requests_total.clone()))
            .expect("register pool_requests_total");
        registry
            .register(Box::new(pool_match_score.clone()))
            .expect("register pool_match_score");
        registry
            .register(Box::new(ride_events_in_queue.clone()))
            .expect("register ride_events_in_queue");

        Self {
            registry,
            dispatch_cycles_total,
            offers_sent_total,
            offer_cancellations_total,
            dispatch_latency_seconds,
            pool_requests_total,
            pool_match_score,
            ride_events_in_queue,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
