// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod modbus_link;
pub mod simulated_link;
