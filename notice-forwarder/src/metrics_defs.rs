//! Metrics definitions for the notice forwarder.

use shared::metrics_defs::{MetricDef, MetricType};

pub const HTTP_REQUEST: MetricDef = MetricDef {
    name: "http.request",
    metric_type: MetricType::Timer,
    description: "Time in milliseconds from receiving a request to sending its response",
};

pub const NOTICE_PARSE_FAIL: MetricDef = MetricDef {
    name: "notice.parse.fail",
    metric_type: MetricType::Counter,
    description: "Inbound notices that could not be parsed or translated for Sentry",
};

pub const STORE_WRITE_FAIL: MetricDef = MetricDef {
    name: "store.write.fail",
    metric_type: MetricType::Counter,
    description: "Failed writes to the correlation store",
};

pub const AIRBRAKE_REQUEST: MetricDef = MetricDef {
    name: "airbrake.request",
    metric_type: MetricType::Timer,
    description: "Airbrake round trip time in milliseconds",
};

pub const AIRBRAKE_REQUEST_SUCCESS: MetricDef = MetricDef {
    name: "airbrake.request.success",
    metric_type: MetricType::Counter,
    description: "Notices accepted by Airbrake",
};

pub const AIRBRAKE_REQUEST_FAIL_TIMEOUT: MetricDef = MetricDef {
    name: "airbrake.request.fail.timeout",
    metric_type: MetricType::Counter,
    description: "Airbrake requests aborted after the configured timeout",
};

pub const AIRBRAKE_REQUEST_FAIL_ERROR: MetricDef = MetricDef {
    name: "airbrake.request.fail.error",
    metric_type: MetricType::Counter,
    description: "Airbrake requests that failed at the connection level",
};

pub const AIRBRAKE_REQUEST_FAIL_XML: MetricDef = MetricDef {
    name: "airbrake.request.fail.xml",
    metric_type: MetricType::Counter,
    description: "Airbrake replies without a notice id",
};

pub const AIRBRAKE_REQUEST_FAIL_RATELIMITED: MetricDef = MetricDef {
    name: "airbrake.request.fail.ratelimited",
    metric_type: MetricType::Counter,
    description: "Airbrake replies rejecting the notice because the project is rate limited",
};

pub const SENTRY_REQUEST: MetricDef = MetricDef {
    name: "sentry.request",
    metric_type: MetricType::Timer,
    description: "Sentry round trip time in milliseconds",
};

pub const SENTRY_REQUEST_SUCCESS: MetricDef = MetricDef {
    name: "sentry.request.success",
    metric_type: MetricType::Counter,
    description: "Events accepted by Sentry",
};

pub const SENTRY_REQUEST_FAIL_TIMEOUT: MetricDef = MetricDef {
    name: "sentry.request.fail.timeout",
    metric_type: MetricType::Counter,
    description: "Sentry requests aborted after the configured timeout",
};

pub const SENTRY_REQUEST_FAIL_ERROR: MetricDef = MetricDef {
    name: "sentry.request.fail.error",
    metric_type: MetricType::Counter,
    description: "Sentry requests that failed at the connection level",
};

pub const SENTRY_REQUEST_FAIL_JSON: MetricDef = MetricDef {
    name: "sentry.request.fail.json",
    metric_type: MetricType::Counter,
    description: "Sentry replies that were not JSON or had no event id",
};

pub const SENTRY_REQUEST_FAIL_COMPRESSION: MetricDef = MetricDef {
    name: "sentry.request.fail.compression",
    metric_type: MetricType::Counter,
    description: "Events that could not be compressed; no request was sent",
};

/// Every metric the forwarder emits.
pub const ALL_METRICS: &[MetricDef] = &[
    HTTP_REQUEST,
    NOTICE_PARSE_FAIL,
    STORE_WRITE_FAIL,
    AIRBRAKE_REQUEST,
    AIRBRAKE_REQUEST_SUCCESS,
    AIRBRAKE_REQUEST_FAIL_TIMEOUT,
    AIRBRAKE_REQUEST_FAIL_ERROR,
    AIRBRAKE_REQUEST_FAIL_XML,
    AIRBRAKE_REQUEST_FAIL_RATELIMITED,
    SENTRY_REQUEST,
    SENTRY_REQUEST_SUCCESS,
    SENTRY_REQUEST_FAIL_TIMEOUT,
    SENTRY_REQUEST_FAIL_ERROR,
    SENTRY_REQUEST_FAIL_JSON,
    SENTRY_REQUEST_FAIL_COMPRESSION,
];
