//! Extract images referenced from GitHub issues and pull requests.

pub mod claude;
pub mod cli;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod github;
pub mod models;
pub mod pathguard;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod storage;
pub mod validate;

#[cfg(test)]
mod test_support;
