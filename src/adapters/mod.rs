pub mod connection_manager;
pub mod http_handler;

pub use connection_manager::ConnectionManager;
pub use http_handler::HttpHandler;
