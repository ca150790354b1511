// Scout directory clients
//
// HTTP implementations of the external service traits defined in
// scout-durable: GitHub for contributor discovery, Google Custom Search for
// LinkedIn profiles, and OpenAI for query normalization and match summaries.

mod http;

pub mod github;
pub mod linkedin;
pub mod openai;

pub use github::{GitHubClient, RateBucket, RateLimitGate};
pub use http::DEFAULT_TIMEOUT;
pub use linkedin::LinkedInSearchClient;
pub use openai::OpenAiClient;
