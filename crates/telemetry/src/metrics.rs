use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Frame analysis ====
    pub static ref CROWD_FRAMES_ANALYZED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("crowd_frames_analyzed_total", "Frames run through the analytics core"),
            &["mode"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref CROWD_DETECTOR_INVOCATIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("crowd_detector_invocations_total", "Detector calls, skipped frames excluded"),
            &["mode", "detector"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref CROWD_FRAME_LATENCY: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "crowd_frame_latency_seconds",
                "Wall time per frame including detection, analysis and rendering",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["mode"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Alerts ====
    pub static ref CROWD_ALERTS_EMITTED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("crowd_alerts_emitted_total", "Congestion alerts sent to clients"),
            &["type"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Sessions ====
    pub static ref CROWD_ACTIVE_SESSIONS: IntGaugeVec = {
        let metric = IntGaugeVec::new(
            Opts::new("crowd_active_sessions", "Analysis sessions currently running"),
            &["mode"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref CROWD_BATCH_JOBS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("crowd_batch_jobs_total", "Uploaded videos processed"),
            &["status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Render every registered metric in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
