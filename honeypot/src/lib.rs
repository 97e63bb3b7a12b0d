pub mod api;
pub mod attempt;
pub mod config;
pub mod geoip;
pub mod hostkey;
pub mod pipeline;
pub mod retry;
pub mod server;
pub mod sinks;
