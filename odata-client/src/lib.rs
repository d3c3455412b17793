pub mod api;
pub mod cli;
pub mod config;

pub use api::ODataClient;
pub use config::ClientConfig;
