pub mod config;
pub mod dates;
pub mod decompress;
pub mod fetch;
pub mod store;
pub mod utils;
