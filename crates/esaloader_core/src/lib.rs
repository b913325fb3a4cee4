pub mod client;
pub mod config;
pub mod document;
pub mod download;
pub mod fetcher;
pub mod http;
pub mod paths;
pub mod progress;
pub mod rewrite;

#[cfg(test)]
mod test_support;
