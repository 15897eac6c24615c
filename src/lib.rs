/// pegel_service: water level threshold alerts for HLNUG gauge stations.
///
/// # Module structure
///
/// ```text
/// pegel_service
/// ├── model       : shared data types (Station, Measurement, alert state, FeedError)
/// ├── config      : TOML configuration loader (pegel.toml)
/// ├── db          : PostgreSQL connection, schema creation and validation
/// ├── daemon      : cycle driver (fetch, evaluate, commit, report) and poll loop
/// ├── endpoint    : HTTP status endpoint fed by the cycle driver
/// ├── logging     : tracing setup, failure classification, status lines
/// ├── notify      : notification contract, SMTP and log-only notifiers
/// ├── ingest
/// │   ├── hlnug   : feed index client, record lookup and field parsing
/// │   └── fixtures (test only) : representative feed payloads
/// ├── store
/// │   ├── pg      : PostgreSQL measurement log and alert state
/// │   └── memory  : in-memory stores for tests and dry runs
/// └── alert
///     ├── thresholds : level computation and labels
///     ├── engine     : policy contract and threshold engine
///     ├── hysteresis : per-threshold fire-once / rearm policy
///     ├── rate_limit : station-level rate limit and level increase policies
///     └── message    : alert mail rendering
/// ```

pub mod alert;
pub mod config;
pub mod daemon;
pub mod db;
pub mod endpoint;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod notify;
pub mod store;
