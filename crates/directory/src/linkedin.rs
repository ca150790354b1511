// LinkedIn profile search
//
// Runs queries through a Google Custom Search engine restricted to LinkedIn
// and turns the result items into profiles and company links.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scout_durable::directory::{NetworkProfile, ProfileSearch, ProfileSearchPage, ServiceError};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::http::{build_client, read_json, request_error, DEFAULT_TIMEOUT};

const CUSTOM_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";

const PROFILE_PREFIX: &str = "https://www.linkedin.com/in/";
const COMPANY_PREFIX: &str = "https://www.linkedin.com/company/";

/// Results per Custom Search page
const PAGE_SIZE: u64 = 10;

fn location_pattern() -> Result<Regex, regex::Error> {
    Regex::new(r"Location: ([^·;]+)")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    search_information: SearchInformation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchInformation {
    total_results: ResultCount,
}

/// Google reports the total as a string; accept a number too
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResultCount {
    Number(u64),
    Text(String),
}

impl ResultCount {
    fn value(&self) -> u64 {
        match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.replace(',', "").parse().unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: String,
    #[serde(default)]
    pagemap: PageMap,
}

#[derive(Debug, Default, Deserialize)]
struct PageMap {
    #[serde(default)]
    metatags: Vec<MetaTags>,
    #[serde(default)]
    cse_image: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct MetaTags {
    #[serde(rename = "og:description")]
    description: Option<String>,
    #[serde(rename = "profile:first_name")]
    first_name: Option<String>,
    #[serde(rename = "profile:last_name")]
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Image {
    src: String,
}

/// Profile search over Google Custom Search
pub struct LinkedInSearchClient {
    client: Client,
    api_key: String,
    engine_id: String,
    api_url: Url,
    location: Regex,
}

impl LinkedInSearchClient {
    pub fn new(api_key: impl Into<String>, engine_id: impl Into<String>) -> Result<Self, ServiceError> {
        Self::with_timeout(api_key, engine_id, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        api_key: impl Into<String>,
        engine_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key: api_key.into(),
            engine_id: engine_id.into(),
            api_url: Url::parse(CUSTOM_SEARCH_URL)
                .map_err(|e| ServiceError::Request(e.to_string()))?,
            location: location_pattern().map_err(|e| ServiceError::Request(e.to_string()))?,
        })
    }

    pub fn with_api_url(mut self, api_url: Url) -> Self {
        self.api_url = api_url;
        self
    }
}

/// Index of the first result on a 1-based page
fn start_index(page: u32) -> Option<u64> {
    (page > 1).then(|| u64::from(page - 1) * PAGE_SIZE + 1)
}

fn remaining_pages(total_results: u64, page: u32) -> u32 {
    let pages = total_results.div_ceil(PAGE_SIZE);
    pages.saturating_sub(u64::from(page)).try_into().unwrap_or(u32::MAX)
}

fn parse_profile(item: &SearchItem, location: &Regex) -> Option<NetworkProfile> {
    let id = item.link.strip_prefix(PROFILE_PREFIX)?.trim_end_matches('/');
    let tags = item.pagemap.metatags.first()?;
    let full_name = format!("{} {}", tags.first_name.as_deref()?, tags.last_name.as_deref()?);

    let description = item
        .pagemap
        .metatags
        .iter()
        .filter_map(|t| t.description.as_deref())
        .collect::<Vec<_>>()
        .join(";");
    let location = location
        .captures(&description)
        .map(|c| c[1].trim().to_string())
        .filter(|l| !l.is_empty());

    Some(NetworkProfile {
        id: id.to_string(),
        full_name,
        location,
        avatar_url: item.pagemap.cse_image.first().map(|i| i.src.clone()),
        html_url: item.link.clone(),
        description,
    })
}

fn parse_page(response: SearchResponse, page: u32, location: &Regex) -> ProfileSearchPage {
    let profiles = response
        .items
        .iter()
        .filter_map(|item| parse_profile(item, location))
        .collect();
    let company_links = response
        .items
        .iter()
        .filter(|item| item.link.starts_with(COMPANY_PREFIX))
        .map(|item| item.link.clone())
        .collect();

    ProfileSearchPage {
        profiles,
        company_links,
        remaining_pages: remaining_pages(response.search_information.total_results.value(), page),
    }
}

#[async_trait]
impl ProfileSearch for LinkedInSearchClient {
    async fn search(&self, query: &str, page: u32) -> Result<ProfileSearchPage, ServiceError> {
        let mut params = vec![
            ("key", self.api_key.clone()),
            ("cx", self.engine_id.clone()),
            ("q", query.to_string()),
        ];
        if let Some(start) = start_index(page) {
            params.push(("start", start.to_string()));
        }

        debug!(query, page, "custom search request");
        let response = self
            .client
            .get(self.api_url.clone())
            .query(&params)
            .send()
            .await
            .map_err(request_error)?;

        Ok(parse_page(read_json(response).await?, page, &self.location))
    }
}
