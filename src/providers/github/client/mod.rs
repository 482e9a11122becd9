mod core;
mod runs;

pub use self::core::{FetchCounters, GitHubClient};
