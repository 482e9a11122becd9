mod client;
mod core;
mod fetcher;
mod normalize;
mod rate_limit;
mod retry;
mod types;

pub use self::core::{AnalysisRequest, BaselineSource, GitHubProvider};
pub use retry::RetryPolicy;
pub use types::RepoId;
