use lazy_static::lazy_static;
use prometheus::{
    HistogramVec, IntCounter, IntCounterVec, IntGauge, register_histogram_vec,
    register_int_counter, register_int_counter_vec, register_int_gauge,
};

// Keep labels low-cardinality: endpoint names, method names, event kinds and outcomes.
lazy_static! {
    /// RPC requests per endpoint and method with result label {ok, error, timeout}.
    pub static ref RPC_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fund_ledger_rpc_requests_total",
        "rpc requests issued by the chain reader",
        &["endpoint", "method", "result"],
    )
    .unwrap();

    /// Number of times the chain reader moved its current endpoint.
    pub static ref RPC_ENDPOINT_SWITCHES_TOTAL: IntCounter = register_int_counter!(
        "fund_ledger_rpc_endpoint_switches_total",
        "number of times the current rpc endpoint changed",
    )
    .unwrap();

    /// Last block durably recorded by the listener checkpoint.
    pub static ref LISTENER_CHECKPOINT_BLOCK: IntGauge = register_int_gauge!(
        "fund_ledger_listener_checkpoint_block",
        "last block recorded in the listener checkpoint",
    )
    .unwrap();

    /// Events passing through the listener pipeline with stage label
    /// {fetched, decoded, duplicate, admitted}.
    pub static ref LISTENER_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fund_ledger_listener_events_total",
        "events observed by the listener per pipeline stage",
        &["stage"],
    )
    .unwrap();

    /// Dedup store fallbacks to the local cache with operation label.
    pub static ref DEDUP_DEGRADED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fund_ledger_dedup_degraded_total",
        "shared dedup store failures that fell back to the local cache",
        &["operation"],
    )
    .unwrap();

    /// Handler invocations per event kind with result label {ok, error}.
    pub static ref DISPATCH_HANDLER_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fund_ledger_dispatch_handler_total",
        "event handler invocations",
        &["event", "result"],
    )
    .unwrap();

    /// Time spent dispatching a single event to all of its handlers.
    pub static ref DISPATCH_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "fund_ledger_dispatch_duration_seconds",
        "time spent dispatching one event to its handlers",
        &["event"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .unwrap();

    /// Approval ticket lifecycle transitions with status label.
    pub static ref APPROVAL_TICKETS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fund_ledger_approval_tickets_total",
        "approval ticket lifecycle transitions",
        &["ticket_type", "status"],
    )
    .unwrap();

    /// Execution gateway calls for approved tickets with result label {ok, error}.
    pub static ref APPROVAL_EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fund_ledger_approval_executions_total",
        "execution gateway calls for approved tickets",
        &["result"],
    )
    .unwrap();
}
