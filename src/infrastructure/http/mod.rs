//! HTTP adapters for metric endpoints and the suggestion service.

pub mod metric_source;
pub mod suggestion_client;

pub use metric_source::HttpMetricSource;
pub use suggestion_client::HttpSuggestionClient;
