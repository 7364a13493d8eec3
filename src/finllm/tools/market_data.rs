//! # Market Data Tools
//!
//! Stock market lookups the model can call mid-generation: latest price,
//! company overview, and the three financial statements. Data comes from a
//! [`QuoteSource`] implementation; [`HttpQuoteSource`] talks to a JSON quote
//! API, and tests plug in an in-memory fake.
//!
//! All statement and overview output is rendered as markdown so the model
//! can quote it directly in answers.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use finllm::tool_executor::ToolRegistry;
//! use finllm::tools::{register_market_data_tools, HttpQuoteSource};
//!
//! let mut registry = ToolRegistry::new();
//! let source = Arc::new(HttpQuoteSource::new("https://quotes.internal.example.com"));
//! register_market_data_tools(&mut registry, source);
//! assert!(registry.resolve("get_current_stock_price").is_some());
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::error::Error;
use std::sync::Arc;

use crate::finllm::http_client_pool::get_or_create_client;
use crate::finllm::tool_executor::{
    ToolDefinition, ToolParameter, ToolParameterType, ToolRegistry, ToolResult,
};

type BoxedError = Box<dyn Error + Send + Sync>;

/// The three statement families a quote source can serve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatementKind {
    BalanceSheet,
    IncomeStatement,
    CashFlow,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::BalanceSheet => "balance_sheet",
            StatementKind::IncomeStatement => "income_statement",
            StatementKind::CashFlow => "cash_flow",
        }
    }

    fn display_name(&self) -> &'static str {
        match self {
            StatementKind::BalanceSheet => "Balance Sheet",
            StatementKind::IncomeStatement => "Income Statement",
            StatementKind::CashFlow => "Cash Flow Statement",
        }
    }
}

/// Company metadata as served by the quote API.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompanyOverview {
    pub symbol: String,
    pub exchange: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub charter_capital: Option<f64>,
    pub outstanding_shares: Option<f64>,
    pub profile: Option<String>,
}

/// One financial statement, latest reporting period first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinancialStatement {
    pub symbol: String,
    /// Reporting period label, e.g. "2024" or "2024-Q4".
    pub period: String,
    pub lines: Vec<StatementLine>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatementLine {
    pub label: String,
    pub value: f64,
}

/// Where market data comes from. Implementations fetch from whatever feed
/// the deployment has access to; errors surface to the caller as tool
/// execution failures, which the gateway logs and skips.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Latest traded price for `symbol`, in the feed's currency.
    async fn latest_price(&self, symbol: &str) -> Result<f64, BoxedError>;

    async fn company_overview(&self, symbol: &str) -> Result<CompanyOverview, BoxedError>;

    async fn financial_statement(
        &self,
        symbol: &str,
        kind: StatementKind,
    ) -> Result<FinancialStatement, BoxedError>;
}

/// [`QuoteSource`] backed by a JSON quote API.
///
/// Expected endpoints, relative to the base URL:
/// - `GET /stocks/{symbol}/price` returning `{"symbol": "...", "price": 12345.0}`
/// - `GET /stocks/{symbol}/overview` returning a [`CompanyOverview`]
/// - `GET /stocks/{symbol}/statements/{kind}` returning a [`FinancialStatement`]
pub struct HttpQuoteSource {
    http: reqwest::Client,
    base_url: String,
}

impl HttpQuoteSource {
    pub fn new(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        HttpQuoteSource {
            http: get_or_create_client(&base_url),
            base_url,
        }
    }

    async fn fetch<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, BoxedError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("market data request failed with status {}", status).into());
        }
        Ok(response.json::<T>().await?)
    }
}

#[derive(Deserialize)]
struct PriceQuote {
    price: f64,
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn latest_price(&self, symbol: &str) -> Result<f64, BoxedError> {
        let quote: PriceQuote = self.fetch(&format!("stocks/{}/price", symbol)).await?;
        Ok(quote.price)
    }

    async fn company_overview(&self, symbol: &str) -> Result<CompanyOverview, BoxedError> {
        self.fetch(&format!("stocks/{}/overview", symbol)).await
    }

    async fn financial_statement(
        &self,
        symbol: &str,
        kind: StatementKind,
    ) -> Result<FinancialStatement, BoxedError> {
        self.fetch(&format!("stocks/{}/statements/{}", symbol, kind.as_str()))
            .await
    }
}

/// Format large numbers for better readability.
pub fn format_number(value: f64) -> String {
    if value >= 1_000_000_000.0 {
        format!("{:.2} billion", value / 1_000_000_000.0)
    } else if value >= 1_000_000.0 {
        format!("{:.2} million", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("{:.2} thousand", value / 1_000.0)
    } else {
        format!("{}", value)
    }
}

fn render_overview_markdown(overview: &CompanyOverview) -> String {
    let mut out = String::new();
    out.push_str("## Company Information\n");
    out.push_str(&format!("**Symbol**: {}\n", overview.symbol));
    out.push_str(&format!(
        "**Exchange**: {}\n",
        overview.exchange.as_deref().unwrap_or("N/A")
    ));
    out.push_str(&format!(
        "**Charter Capital**: {}\n",
        overview
            .charter_capital
            .map(format_number)
            .unwrap_or_else(|| "N/A".to_string())
    ));
    out.push_str(&format!(
        "**Outstanding Shares**: {}\n",
        overview
            .outstanding_shares
            .map(format_number)
            .unwrap_or_else(|| "N/A".to_string())
    ));
    out.push_str("\n## Industry Classification\n");
    out.push_str(&format!(
        "**Sector**: {}\n",
        overview.sector.as_deref().unwrap_or("N/A")
    ));
    out.push_str(&format!(
        "**Industry**: {}\n",
        overview.industry.as_deref().unwrap_or("N/A")
    ));
    out.push_str("\n## Company Profile\n");
    match overview.profile.as_deref() {
        Some(profile) if !profile.is_empty() => {
            out.push_str(profile);
            out.push('\n');
        }
        _ => out.push_str("No profile available.\n"),
    }
    out
}

fn render_statement_markdown(kind: StatementKind, statement: &FinancialStatement) -> String {
    let mut out = format!(
        "# {} for {} ({})\n\n| Item | Value |\n|---|---|\n",
        kind.display_name(),
        statement.symbol,
        statement.period
    );
    for line in &statement.lines {
        out.push_str(&format!("| {} | {} |\n", line.label, format_number(line.value)));
    }
    out
}

fn require_symbol(params: &serde_json::Value) -> Result<String, BoxedError> {
    params
        .get("symbol")
        .and_then(|value| value.as_str())
        .map(|symbol| symbol.trim().to_uppercase())
        .filter(|symbol| !symbol.is_empty())
        .ok_or_else(|| "missing required parameter: symbol".into())
}

fn symbol_parameter() -> ToolParameter {
    ToolParameter::new("symbol", ToolParameterType::String)
        .with_description("Stock ticker symbol, e.g. \"FPT\" or \"VNM\"")
        .required()
}

fn register_statement_tool(
    registry: &mut ToolRegistry,
    source: &Arc<dyn QuoteSource>,
    kind: StatementKind,
    name: &str,
    description: &str,
) {
    let source = Arc::clone(source);
    registry.register_async(
        ToolDefinition::new(name, description).with_parameter(symbol_parameter()),
        Arc::new(move |params| {
            let source = Arc::clone(&source);
            Box::pin(async move {
                let symbol = require_symbol(&params)?;
                let statement = source.financial_statement(&symbol, kind).await?;
                let markdown = render_statement_markdown(kind, &statement);
                Ok(ToolResult::success(json!(markdown)))
            })
        }),
    );
}

/// Register the five market data tools against `registry`.
///
/// Tool names match what the model is prompted with: failures inside a tool
/// (unknown symbol, feed outage) come back as execution errors and the
/// gateway skips the result rather than failing the turn.
pub fn register_market_data_tools(registry: &mut ToolRegistry, source: Arc<dyn QuoteSource>) {
    {
        let source = Arc::clone(&source);
        registry.register_async(
            ToolDefinition::new(
                "get_current_stock_price",
                "Get the current stock price of a given symbol, in VND.",
            )
            .with_parameter(symbol_parameter()),
            Arc::new(move |params| {
                let source = Arc::clone(&source);
                Box::pin(async move {
                    let symbol = require_symbol(&params)?;
                    let price = source.latest_price(&symbol).await?;
                    Ok(ToolResult::success(json!({
                        "symbol": symbol,
                        "price": price,
                        "currency": "VND",
                    })))
                })
            }),
        );
    }

    {
        let source = Arc::clone(&source);
        registry.register_async(
            ToolDefinition::new(
                "get_company_overview",
                "Get the company overview of a given symbol: exchange, industry \
                 classification, capital structure, and business profile.",
            )
            .with_parameter(symbol_parameter()),
            Arc::new(move |params| {
                let source = Arc::clone(&source);
                Box::pin(async move {
                    let symbol = require_symbol(&params)?;
                    let overview = source.company_overview(&symbol).await?;
                    Ok(ToolResult::success(json!(render_overview_markdown(
                        &overview
                    ))))
                })
            }),
        );
    }

    register_statement_tool(
        registry,
        &source,
        StatementKind::BalanceSheet,
        "get_company_financial_statement",
        "Get the company balance sheet of a given symbol, showing assets, \
         liabilities, and shareholders' equity in markdown format.",
    );
    register_statement_tool(
        registry,
        &source,
        StatementKind::IncomeStatement,
        "get_company_income_statement",
        "Get the company income statement of a given symbol, showing revenue, \
         expenses, and profit in markdown format.",
    );
    register_statement_tool(
        registry,
        &source,
        StatementKind::CashFlow,
        "get_company_cash_flow_statement",
        "Get the company cash flow statement of a given symbol, broken down \
         into operating, investing, and financing activities.",
    );
}
