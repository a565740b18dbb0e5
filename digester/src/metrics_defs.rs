//! Metrics definitions for the digester.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

#[macro_export]
macro_rules! counter {
    ($def:expr) => {
        metrics::counter!($def.name)
    };
    ($def:expr, $($labels:tt)+) => {
        metrics::counter!($def.name, $($labels)+)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr) => {
        metrics::histogram!($def.name)
    };
    ($def:expr, $($labels:tt)+) => {
        metrics::histogram!($def.name, $($labels)+)
    };
}

pub const REQUESTS: MetricDef = MetricDef {
    name: "digester.requests",
    metric_type: MetricType::Counter,
    description: "Requests handled, tagged by handler and response status",
};

pub const DIGEST_PRODUCE_DURATION: MetricDef = MetricDef {
    name: "digester.produce.duration",
    metric_type: MetricType::Histogram,
    description: "Time to build and upload a digest in seconds",
};

pub const DIGEST_BYTES: MetricDef = MetricDef {
    name: "digester.produce.bytes",
    metric_type: MetricType::Histogram,
    description: "Uncompressed size of produced digests",
};

pub const SOURCE_OBJECTS_FETCHED: MetricDef = MetricDef {
    name: "digester.source.objects_fetched",
    metric_type: MetricType::Counter,
    description: "Flow log objects downloaded from the source bucket",
};

pub const QUEUE_RETRIES: MetricDef = MetricDef {
    name: "digester.queue.retries",
    metric_type: MetricType::Counter,
    description: "Dispatch requests retried after a server error",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS,
    DIGEST_PRODUCE_DURATION,
    DIGEST_BYTES,
    SOURCE_OBJECTS_FETCHED,
    QUEUE_RETRIES,
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_metric_names_are_unique() {
        let names: HashSet<_> = ALL_METRICS.iter().map(|m| m.name).collect();
        assert_eq!(names.len(), ALL_METRICS.len());
        assert!(ALL_METRICS.iter().all(|m| m.name.starts_with("digester.")));
    }
}
