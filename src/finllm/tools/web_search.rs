//! # Web Search Tool
//!
//! Google Custom Search lookups for questions the model cannot answer from
//! reports or market data alone. Results come back as a plain text digest
//! (`SOURCE n` / `URL` / `SUMMARY` sections) the model can cite from.

use serde::Deserialize;
use serde_json::json;
use std::error::Error;
use std::sync::Arc;

use crate::finllm::http_client_pool::get_or_create_client;
use crate::finllm::tool_executor::{
    ToolDefinition, ToolParameter, ToolParameterType, ToolRegistry, ToolResult,
};

type BoxedError = Box<dyn Error + Send + Sync>;

pub const DEFAULT_SEARCH_BASE_URL: &str = "https://www.googleapis.com/customsearch/v1";

/// Credentials and tuning for the Custom Search API.
#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub api_key: String,
    pub engine_id: String,
    /// How many results to request. The free tier caps this at 10.
    pub result_count: u32,
    pub base_url: String,
}

impl SearchConfig {
    pub fn new(api_key: impl Into<String>, engine_id: impl Into<String>) -> Self {
        SearchConfig {
            api_key: api_key.into(),
            engine_id: engine_id.into(),
            result_count: 10,
            base_url: DEFAULT_SEARCH_BASE_URL.to_string(),
        }
    }

    /// Read `FINLLM_SEARCH_API_KEY` and `FINLLM_SEARCH_ENGINE_ID`. Returns
    /// `None` when either is unset, letting callers skip registration.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("FINLLM_SEARCH_API_KEY").ok()?;
        let engine_id = std::env::var("FINLLM_SEARCH_ENGINE_ID").ok()?;
        Some(SearchConfig::new(api_key, engine_id))
    }

    pub fn with_result_count(mut self, count: u32) -> Self {
        self.result_count = count;
        self
    }

    /// Point the tool at a different endpoint, e.g. a mock server in tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    title: String,
    link: String,
    snippet: Option<String>,
}

async fn run_search(
    config: &SearchConfig,
    http: &reqwest::Client,
    query: &str,
) -> Result<String, BoxedError> {
    let url = format!(
        "{}?q={}&key={}&cx={}&num={}",
        config.base_url,
        urlencoding::encode(query),
        urlencoding::encode(&config.api_key),
        urlencoding::encode(&config.engine_id),
        config.result_count,
    );

    let response = http.get(&url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("search request failed with status {}", status).into());
    }

    let parsed: SearchResponse = response.json().await?;
    Ok(render_results(&parsed.items))
}

fn render_results(items: &[SearchItem]) -> String {
    if items.is_empty() {
        return "No results found for the given query.".to_string();
    }

    let mut sections = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        sections.push(format!(
            "SOURCE {}: {}\nURL: {}\nSUMMARY: {}\n{}",
            index + 1,
            item.title,
            item.link,
            item.snippet.as_deref().unwrap_or(""),
            "-".repeat(80),
        ));
    }
    sections.join("\n")
}

/// Register the `search_information` tool against `registry`.
pub fn register_web_search_tool(registry: &mut ToolRegistry, config: SearchConfig) {
    let http = get_or_create_client(&config.base_url);
    registry.register_async(
        ToolDefinition::new(
            "search_information",
            "Search the web for current information on a topic. Use this for \
             recent news, market events, or facts not covered by the other tools.",
        )
        .with_parameter(
            ToolParameter::new("search_query", ToolParameterType::String)
                .with_description("The search query")
                .required(),
        ),
        Arc::new(move |params| {
            let config = config.clone();
            let http = http.clone();
            Box::pin(async move {
                let query = match params.get("search_query").and_then(|value| value.as_str()) {
                    Some(query) if !query.trim().is_empty() => query.trim().to_string(),
                    _ => return Err("missing required parameter: search_query".into()),
                };
                let digest = run_search(&config, &http, &query).await?;
                Ok(ToolResult::success(json!(digest)))
            })
        }),
    );
}
