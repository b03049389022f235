pub mod client;
pub mod detector;
pub mod http;
pub mod parser;
pub mod relay;
pub mod scheduler;
pub mod store;
