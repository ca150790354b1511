// OpenAI chat-completions client
//
// Turns free-text queries into search parameters, and rates a match against
// the query. Answers are pulled out of the model's reply as JSON, fenced or
// bare.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scout_durable::directory::{
    NetworkProfile, ProfileSnapshot, QueryNormalizer, RepositorySummary, SearchParams,
    ServiceError, Summarizer, Summary, SummaryContext,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http::{build_client, read_json, request_error, DEFAULT_TIMEOUT};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";

/// Repositories described to the model, newest first
const PROMPT_REPOSITORIES: usize = 5;

const INSTRUCTIONS: &str = "Summarize why this person is a good fit for the query, \
then give a holistic rating on a scale of 5-20 of how well they match it. \
Weigh a location close to the one asked for heavily in the rating but leave it out of the summary. \
List pros first, then cons. \
Answer with a JSON object only, for example: \
{\"summary\": \"+built an ML pipeline for healthcare +knows TypeScript | -no Svelte experience\", \"rating\": 8.5}";

const SEARCH_PARAMS_INSTRUCTIONS: &str = "Return the domain keywords that would make an effective \
GitHub repository search for the query, plus the developer roles and programming languages it asks for. \
Leave languages empty unless the query names them explicitly. \
Answer with a JSON object only, for example, for the query \
\"frontend developer with Svelte experience interested in healthcare\": \
{\"keywords\": [\"healthcare\", \"medical\"], \"role\": [\"frontend\", \"fullstack\"], \"language\": [\"svelte\", \"typescript\"]}";

const PROFILE_QUERY_INSTRUCTIONS: &str = "Write a one-line Google search query, without explanations \
and without a site: filter, that finds LinkedIn profiles of the candidate described below.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Summarizer and query normalizer backed by the OpenAI chat-completions API
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
    fenced_json: Regex,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ServiceError> {
        Self::with_timeout(api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key: api_key.into(),
            api_url: OPENAI_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            fenced_json: Regex::new(r"```json\s*\n([\s\S]*?)\n\s*```")
                .map_err(|e| ServiceError::Request(e.to_string()))?,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Use an OpenAI-compatible endpoint
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Pull a JSON object out of the model's reply
    fn parse_reply<T: DeserializeOwned>(&self, content: &str) -> Result<T, ServiceError> {
        let json = self
            .fenced_json
            .captures(content)
            .and_then(|c| c.get(1))
            .map_or(content, |m| m.as_str());

        serde_json::from_str(json.trim()).map_err(|e| {
            ServiceError::invalid_response(format!("reply is not the expected JSON ({e}): {json}"))
        })
    }

    /// Send one user message and return the text of the first choice
    async fn complete(&self, prompt: String) -> Result<String, ServiceError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Some(prompt),
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;
        let reply: ChatResponse = read_json(response).await?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ServiceError::invalid_response("no content in completion"))?;
        debug!(model = %self.model, reply_len = content.len(), "completion received");
        Ok(content)
    }
}

fn prompt(query: &str, context: &SummaryContext) -> String {
    let details = match context {
        SummaryContext::Contributor {
            profile,
            repositories,
        } => contributor_details(profile, repositories),
        SummaryContext::Profile(profile) => profile_details(profile),
    };
    format!("{INSTRUCTIONS}\n\nQuery: {query}\n{details}")
}

fn contributor_details(profile: &ProfileSnapshot, repositories: &[RepositorySummary]) -> String {
    let mut newest: Vec<&RepositorySummary> = repositories.iter().collect();
    // ISO-8601 timestamps sort chronologically as strings
    newest.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut details = String::new();
    if let Some(location) = &profile.location {
        details.push_str(&format!("Location: {location}\n"));
    }
    details.push_str("Projects:\n");
    for repo in newest.into_iter().take(PROMPT_REPOSITORIES) {
        details.push_str(&format!(
            "- Name: {}\n  Description: {}\n",
            repo.name,
            repo.description.as_deref().unwrap_or("none")
        ));
        if let Some(language) = &repo.language {
            details.push_str(&format!("  Language: {language}\n"));
        }
    }
    details
}

fn profile_details(profile: &NetworkProfile) -> String {
    let mut details = format!("Description: {}\n", profile.description);
    if let Some(location) = &profile.location {
        details.push_str(&format!("Location: {location}\n"));
    }
    details
}

#[async_trait]
impl Summarizer for OpenAiClient {
    async fn summarize(
        &self,
        query: &str,
        context: &SummaryContext,
    ) -> Result<Summary, ServiceError> {
        let content = self.complete(prompt(query, context)).await?;
        self.parse_reply(&content)
    }
}

#[async_trait]
impl QueryNormalizer for OpenAiClient {
    async fn contributor_params(&self, query: &str) -> Result<SearchParams, ServiceError> {
        let content = self
            .complete(format!("{SEARCH_PARAMS_INSTRUCTIONS}\n\nQuery: {query}"))
            .await?;
        self.parse_reply(&content)
    }

    async fn profile_query(&self, query: &str) -> Result<String, ServiceError> {
        let content = self
            .complete(format!("{PROFILE_QUERY_INSTRUCTIONS}\n\nCandidate: {query}"))
            .await?;
        Ok(first_line(&content))
    }
}

/// First non-blank line, without code fences or wrapping backticks
fn first_line(content: &str) -> String {
    content
        .lines()
        .map(|l| l.trim().trim_matches('`').trim())
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn repo(name: &str, created_at: &str) -> RepositorySummary {
        RepositorySummary {
            name: name.to_string(),
            description: Some(format!("{name} description")),
            html_url: format!("https://github.com/ann/{name}"),
            language: Some("Rust".to_string()),
            contributors_url: format!("https://api.github.com/repos/ann/{name}/contributors"),
            created_at: created_at.to_string(),
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        })
    }

    #[test]
    fn test_contributor_prompt_lists_newest_repositories() {
        let profile = ProfileSnapshot {
            login: "ann".into(),
            name: None,
            location: Some("Lisbon".into()),
            email: None,
            html_url: "https://github.com/ann".into(),
            avatar_url: "https://avatars.githubusercontent.com/u/1".into(),
        };
        let repositories: Vec<_> = (1..=7)
            .map(|i| repo(&format!("r{i}"), &format!("2024-0{i}-01T00:00:00Z")))
            .collect();

        let text = prompt(
            "rust dev",
            &SummaryContext::Contributor {
                profile,
                repositories,
            },
        );
        assert!(text.contains("Query: rust dev"));
        assert!(text.contains("Location: Lisbon"));
        assert!(text.contains("r7") && text.contains("r3"));
        assert!(!text.contains("r2 description"));
    }

    #[test]
    fn test_parse_reply_forms() {
        let client = OpenAiClient::new("key").unwrap();

        let plain: Summary = client
            .parse_reply(r#"{"summary": "+rust", "rating": 12}"#)
            .unwrap();
        assert_eq!(plain.rating, 12.0);

        let fenced: Summary = client
            .parse_reply("Here you go:\n```json\n{\"summary\": \"+go\", \"rating\": 9.5}\n```")
            .unwrap();
        assert_eq!(fenced.summary, "+go");

        assert!(matches!(
            client.parse_reply::<Summary>("I cannot rate this person."),
            Err(ServiceError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_summarize_profile() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(bearer_token("sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                "```json\n{\"summary\": \"+distributed systems\", \"rating\": 15}\n```",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let summarizer = OpenAiClient::new("sk-test")
            .unwrap()
            .with_model("gpt-4o-mini")
            .with_api_url(format!("{}/v1/chat/completions", server.uri()));

        let profile = NetworkProfile {
            id: "ann-lee".into(),
            full_name: "Ann Lee".into(),
            description: "Staff engineer, storage".into(),
            location: Some("Berlin".into()),
            avatar_url: None,
            html_url: "https://www.linkedin.com/in/ann-lee".into(),
        };
        let summary = summarizer
            .summarize("storage engineer", &SummaryContext::Profile(profile))
            .await
            .unwrap();
        assert_eq!(summary.summary, "+distributed systems");
        assert_eq!(summary.rating, 15.0);
    }

    #[tokio::test]
    async fn test_summarize_without_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let summarizer = OpenAiClient::new("sk-test")
            .unwrap()
            .with_api_url(server.uri());
        let context = SummaryContext::Profile(NetworkProfile {
            id: "x".into(),
            full_name: "X".into(),
            description: String::new(),
            location: None,
            avatar_url: None,
            html_url: "https://www.linkedin.com/in/x".into(),
        });
        assert!(matches!(
            summarizer.summarize("q", &context).await,
            Err(ServiceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_first_line_of_reply() {
        assert_eq!(first_line("\n  rust engineer berlin \nbecause..."), "rust engineer berlin");
        assert_eq!(first_line("```\n\"staff engineer\" storage\n```"), "\"staff engineer\" storage");
        assert_eq!(first_line("   "), "");
    }

    #[tokio::test]
    async fn test_contributor_params_from_fenced_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                "```json\n{\"keywords\": [\"payments\", \"ledger\"], \"role\": [\"backend\"], \"language\": [\"rust\"]}\n```",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiClient::new("sk-test")
            .unwrap()
            .with_api_url(format!("{}/v1/chat/completions", server.uri()));
        let params = client
            .contributor_params("rust backend dev for a payments ledger")
            .await
            .unwrap();
        assert_eq!(params.keywords, vec!["payments", "ledger"]);
        assert_eq!(params.role, vec!["backend"]);
        assert_eq!(params.language, vec!["rust"]);
        assert!(params.location.is_empty());
    }

    #[tokio::test]
    async fn test_contributor_params_without_keywords_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion(r#"{"role": ["backend"]}"#)),
            )
            .mount(&server)
            .await;

        let client = OpenAiClient::new("sk-test")
            .unwrap()
            .with_api_url(server.uri());
        assert!(matches!(
            client.contributor_params("anyone").await,
            Err(ServiceError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_profile_query_keeps_first_line() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(bearer_token("sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                "\"site reliability engineer\" Kubernetes Berlin\nThis finds SREs in Berlin.",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiClient::new("sk-test")
            .unwrap()
            .with_api_url(server.uri());
        let query = client
            .profile_query("an SRE in Berlin who knows Kubernetes")
            .await
            .unwrap();
        assert_eq!(query, "\"site reliability engineer\" Kubernetes Berlin");
    }
}
