pub mod api;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod folders;
pub mod pipeline;
pub mod types;

#[cfg(test)]
mod testing;
