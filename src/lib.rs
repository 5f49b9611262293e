pub mod bus;
pub mod cli;
pub mod clock;
pub mod codec;
pub mod config;
pub mod crawl;
pub mod csv_sink;
pub mod error;
pub mod rest_fetcher;
pub mod streamer;
pub mod supervisor;
pub mod token;
