pub mod cache;
pub mod fetcher;
pub mod loader;
pub mod source;
pub mod storage;
pub mod yahoo;
