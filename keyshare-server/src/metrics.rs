pub const METRICS_KEY_PIN_CHECK_SUCCESS: &str = "keyshare.pin_check.success";
pub const METRICS_KEY_PIN_CHECK_FAILED: &str = "keyshare.pin_check.failed";
pub const METRICS_KEY_PIN_CHECK_REFUSED: &str = "keyshare.pin_check.refused";
pub const METRICS_KEY_PIN_CHECK_BLOCKED: &str = "keyshare.pin_check.blocked";
pub const METRICS_KEY_REGISTRATIONS: &str = "keyshare.registrations";
pub const METRICS_KEY_COMMITMENTS_ISSUED: &str = "keyshare.commitments.issued";
pub const METRICS_KEY_RESPONSES_ISSUED: &str = "keyshare.responses.issued";
pub const METRICS_KEY_OPEN_CACHE_ENTRIES: &str = "keyshare.session_cache.open";
pub const METRICS_KEY_DELETED_CACHE_ENTRIES: &str = "keyshare.session_cache.deleted";

/// Describe all metrics used by the service.
///
/// This calls the `describe_*` functions from the `metrics` crate to set metadata on the different metrics.
pub fn describe_metrics() {
    metrics::describe_counter!(
        METRICS_KEY_PIN_CHECK_SUCCESS,
        metrics::Unit::Count,
        "Number of successful PIN verifications"
    );
    metrics::describe_counter!(
        METRICS_KEY_PIN_CHECK_FAILED,
        metrics::Unit::Count,
        "Number of failed PIN verifications"
    );
    metrics::describe_counter!(
        METRICS_KEY_PIN_CHECK_REFUSED,
        metrics::Unit::Count,
        "Number of PIN verifications refused due to an active block"
    );
    metrics::describe_counter!(
        METRICS_KEY_PIN_CHECK_BLOCKED,
        metrics::Unit::Count,
        "Number of accounts blocked after exhausting the PIN budget"
    );
    metrics::describe_counter!(
        METRICS_KEY_REGISTRATIONS,
        metrics::Unit::Count,
        "Number of completed enrollments"
    );
    metrics::describe_counter!(
        METRICS_KEY_COMMITMENTS_ISSUED,
        metrics::Unit::Count,
        "Number of getCommitments calls answered"
    );
    metrics::describe_counter!(
        METRICS_KEY_RESPONSES_ISSUED,
        metrics::Unit::Count,
        "Number of getResponse calls answered"
    );
    metrics::describe_gauge!(
        METRICS_KEY_OPEN_CACHE_ENTRIES,
        metrics::Unit::Count,
        "Number of live session cache entries"
    );
    metrics::describe_counter!(
        METRICS_KEY_DELETED_CACHE_ENTRIES,
        metrics::Unit::Count,
        "Number of session cache entries removed by the expiry sweep"
    );
}
