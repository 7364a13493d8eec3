//! Built-in Tool Implementations
//!
//! Domain tools the gateway can expose to the model during generation. Each
//! registers itself against a [`ToolRegistry`](crate::tool_executor::ToolRegistry)
//! and renders its output as text the model can quote directly.
//!
//! # Available Tools
//!
//! - **Market data**: latest price, company overview, and the balance sheet,
//!   income statement, and cash flow statement for a ticker symbol, rendered
//!   as markdown. Backed by any [`QuoteSource`] implementation.
//! - **Web search**: Google Custom Search lookups for current events and
//!   facts outside the market data feed.

pub mod market_data;
pub mod web_search;

pub use market_data::{
    format_number, register_market_data_tools, CompanyOverview, FinancialStatement,
    HttpQuoteSource, QuoteSource, StatementKind, StatementLine,
};
pub use web_search::{register_web_search_tool, SearchConfig};
