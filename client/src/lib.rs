pub mod api;
pub mod bridge;
pub mod config;
pub mod driver;
pub mod input;
