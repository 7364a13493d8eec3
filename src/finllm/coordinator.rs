//! Ties sessions to the gateway: prompt building, immediate fragment
//! forwarding, and the exactly-once history commit.
//!
//! [`StreamCoordinator::handle`] snapshots the session history, builds a
//! prompt embedding it (plus any financial report content), and drives the
//! gateway from a detached task. Fragments are forwarded to the caller the
//! moment they arrive; the full text accumulates on the side and is
//! committed to the session exactly once when the gateway stream ends
//! naturally. A terminal gateway failure forwards whatever was already
//! yielded but never appends a partial turn — and a caller that walks away
//! early only stops watching: the turn still runs to completion.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use finllm::{CredentialPool, GatewayConfig, ModelGateway, SessionRegistry, StreamCoordinator};
//! use finllm::clients::gemini::GeminiClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = Arc::new(CredentialPool::from_env("GEMINI_API_KEY")?);
//!     let gateway = Arc::new(ModelGateway::new(
//!         Arc::new(GeminiClient::new()),
//!         pool,
//!         GatewayConfig::default(),
//!     ));
//!     let coordinator = StreamCoordinator::new(gateway, Arc::new(SessionRegistry::new()));
//!
//!     let mut stream = coordinator.handle(Some("s1"), "How did VNM perform last year?").await;
//!     while let Some(fragment) = stream.next().await {
//!         print!("{}", fragment);
//!     }
//!     Ok(())
//! }
//! ```

use futures_util::{Stream, StreamExt};
use log::{debug, error};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::finllm::client_wrapper::{Message, Role};
use crate::finllm::gateway::ModelGateway;
use crate::finllm::report_store::ReportStore;
use crate::finllm::session::SessionRegistry;

/// Default persona steering every turn. Callers override it with
/// [`StreamCoordinator::with_system_instruction`].
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are a helpful financial assistant that can provide information based on \
financial reports, documents, or general knowledge. When answering:

1. If financial report data is provided, prioritize information from those reports.
2. If context is provided, use that as secondary information.
3. If neither financial reports nor context has the answer but you know it, provide a general answer based on your financial knowledge.
4. Be concise and clear in your explanations.
5. Format financial data in a readable way.
6. When discussing financial metrics, define them briefly before analyzing them.
7. If you're unsure, acknowledge the limitations of your knowledge.
8. If the user asks about a topic that is not related to finance, acknowledge that you are not able to answer that question.
9. Always answer general financial questions like definitions of P/E ratio, ROI, or other common financial terms.
10. If analyzing multiple reports, highlight trends and changes over time.

Financial reports, when available, are provided between [FINANCIAL REPORTS] tags.
Context, when available, is provided between [CONTEXT] tags.";

/// Stream of text fragments for one turn, plus the id of the session the
/// turn belongs to (useful when the session was just minted).
pub struct ChatStream {
    session_id: String,
    receiver: mpsc::UnboundedReceiver<String>,
}

impl ChatStream {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Stream for ChatStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

/// Orchestrates one chat turn end to end.
pub struct StreamCoordinator {
    gateway: Arc<ModelGateway>,
    sessions: Arc<SessionRegistry>,
    reports: Option<Arc<dyn ReportStore>>,
    system_instruction: String,
}

impl StreamCoordinator {
    pub fn new(gateway: Arc<ModelGateway>, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            gateway,
            sessions,
            reports: None,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }

    /// Attach a report store so turns can embed financial report content.
    pub fn with_report_store(mut self, reports: Arc<dyn ReportStore>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Replace the default system instruction.
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    /// The registry backing this coordinator.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Run one turn for `session_id` (minting a session when `None`) and
    /// stream the response fragments.
    pub async fn handle(&self, session_id: Option<&str>, query: &str) -> ChatStream {
        self.handle_with_report(session_id, query, None, None).await
    }

    /// Like [`StreamCoordinator::handle`], additionally embedding financial
    /// report content for `symbol` (narrowed by `period`) when the report
    /// store has any.
    pub async fn handle_with_report(
        &self,
        session_id: Option<&str>,
        query: &str,
        symbol: Option<&str>,
        period: Option<&str>,
    ) -> ChatStream {
        let session = self.sessions.get_or_create(session_id);
        let history = session.snapshot_history();

        let report_content = match (&self.reports, symbol) {
            (Some(store), Some(symbol)) => store.report_content(symbol, period).await,
            _ => None,
        };

        let prompt = build_prompt(&history, query, report_content.as_deref());
        let mut inner = self
            .gateway
            .stream_generate(Some(self.system_instruction.clone()), prompt);

        let (sender, receiver) = mpsc::unbounded_channel();
        let session_id = session.id().to_string();
        let query = query.to_string();

        // Detached driver: the turn runs to completion even when the caller
        // stops polling, and the commit happens here, not in the caller.
        tokio::spawn(async move {
            let mut accumulated = String::new();
            let mut failed = false;
            while let Some(item) = inner.next().await {
                match item {
                    Ok(fragment) => {
                        accumulated.push_str(&fragment);
                        // A closed receiver only means nobody is watching.
                        let _ = sender.send(fragment);
                    }
                    Err(err) => {
                        error!(
                            "generation for session {} ended with terminal failure: {}",
                            session.id(),
                            err
                        );
                        failed = true;
                    }
                }
            }
            if !failed && !accumulated.is_empty() {
                session.append_turn(&query, &accumulated);
                debug!(
                    "committed turn to session {} ({} response chars)",
                    session.id(),
                    accumulated.len()
                );
            }
        });

        ChatStream {
            session_id,
            receiver,
        }
    }

    /// Remove a session entirely. Returns `false` when the id is unknown.
    pub fn clear_session(&self, session_id: &str) -> bool {
        self.sessions.clear_session(session_id)
    }
}

/// Assemble the prompt for one turn. Prior turns render inside a
/// `[CONTEXT]` block, report content inside `[FINANCIAL REPORTS]`, and the
/// bare query stands alone when there is neither.
fn build_prompt(history: &[Message], query: &str, report_content: Option<&str>) -> String {
    let conversation_context = if history.is_empty() {
        None
    } else {
        let lines: Vec<String> = history
            .iter()
            .map(|message| {
                let speaker = match message.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                    Role::System => "System",
                };
                format!("{}: {}", speaker, message.content)
            })
            .collect();
        Some(format!(
            "[CONTEXT]\nPrevious conversation:\n{}\n[/CONTEXT]",
            lines.join("\n")
        ))
    };

    match (report_content, conversation_context) {
        (Some(report), Some(context)) => format!(
            "[FINANCIAL REPORTS]\n{}\n[/FINANCIAL REPORTS]\n\n{}\n\
             Based on the financial reports provided, please answer the following question:\n{}\n\n\
             If the financial reports don't contain information about this question but it's a \
             general financial concept, please provide a helpful answer based on your financial knowledge.",
            report, context, query
        ),
        (Some(report), None) => format!(
            "[FINANCIAL REPORTS]\n{}\n[/FINANCIAL REPORTS]\n\n\
             Based on the financial reports provided, please answer the following question:\n{}\n\n\
             If the financial reports don't contain information about this question but it's a \
             general financial concept, please provide a helpful answer based on your financial knowledge.",
            report, query
        ),
        (None, Some(context)) => format!(
            "{}\nBased on the previous conversation, answer the following question:\n{}",
            context, query
        ),
        (None, None) => format!(
            "You are a helpful financial assistant. Please answer the following question to the \
             best of your ability:\n{}",
            query
        ),
    }
}
