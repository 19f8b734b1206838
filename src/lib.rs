pub mod api;
pub mod app;
pub mod cache;
pub mod codec;
pub mod config;
pub mod logging;
pub mod resource;

#[cfg(test)]
mod testing;
