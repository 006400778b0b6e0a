// Presentation layer - HTTP consumer boundary
pub mod app_state;
pub mod dto;
pub mod handlers;
pub mod routes;
