// Application layer - Acquisition, aggregation and publishing use cases
pub mod connection_manager;
pub mod device_link;
pub mod errors;
pub mod history_log;
pub mod machine_service;
pub mod polling_scheduler;
pub mod snapshot_store;
pub mod status_reader;

#[cfg(test)]
pub(crate) mod test_support;
