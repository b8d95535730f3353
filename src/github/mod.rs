//! GitHub (destination forge) client and models.

pub mod client;
pub mod mock;
pub mod models;
pub mod secrets;
pub mod traits;

pub use client::GitHubClient;
pub use traits::GitHubApi;
