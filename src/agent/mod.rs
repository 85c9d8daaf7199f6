//! Tool-orchestration agent: a ReAct loop over the LLM provider and the tool set.
//!
//! The LLM plans and selects tools, the runtime executes them, their serialized
//! outputs re-enter the conversation, and the loop terminates when the model emits
//! a turn without tool calls (or hits the iteration cap). The agent never raises to
//! its caller: provider failures, tool failures, and parse failures all surface as
//! content in the final result.

mod prompt;
mod tools;

use std::sync::Arc;

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use prompt::system_prompt;
pub use tools::{AnalysisReport, ComparisonReport, DocumentSummary, ToolRuntime};

use crate::error::Result;
use crate::llm::{ChatMessage, ChatRole, LlmProvider, ToolSpec};

/// Default bound on tool rounds per query.
const DEFAULT_MAX_ITERATIONS: usize = 8;

/// Identity of a document touched during a run, harvested from tool messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub doc_id: String,
    pub sec_code: Option<String>,
    pub filer_name: Option<String>,
    pub doc_type_code: Option<String>,
    pub period_start: Option<String>,
    pub period_end: Option<String>,
    pub doc_description: Option<String>,
}

/// Structured outcome of one orchestrated query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorResult {
    pub query: String,

    /// Inferred intent label (検索 / 取得 / 分析 / 比較 / 要約 / IR / その他).
    pub intent: String,

    /// The final answer text, normalized from whatever content shape the model
    /// produced.
    pub result: String,

    /// Tool names in first-use order, duplicate-free.
    pub tools_used: Vec<String>,

    /// Documents referenced by tool results during the run.
    pub documents: Vec<DocumentInfo>,
}

/// The ReAct agent.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use kaijikit::{Config, Orchestrator, ToolRuntime};
/// # async fn example(runtime: ToolRuntime) -> Result<(), kaijikit::AgentError> {
/// # let config = Config::load()?;
/// let provider = kaijikit::default_provider(&config.llm)?;
/// let agent = Orchestrator::new(provider, Arc::new(runtime));
/// let result = agent.process("トヨタの最新の有報を要約して").await?;
/// println!("{} (tools: {:?})", result.result, result.tools_used);
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    runtime: Arc<ToolRuntime>,
    tools: Vec<ToolSpec>,
    max_iterations: usize,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn LlmProvider>, runtime: Arc<ToolRuntime>) -> Self {
        Self {
            provider,
            runtime,
            tools: ToolRuntime::tool_specs(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Processes one query from scratch.
    pub async fn process(&self, query: &str) -> Result<OrchestratorResult> {
        let (result, _) = self.process_with_history(Vec::new(), query).await?;
        Ok(result)
    }

    /// Processes a query continuing an existing conversation.
    ///
    /// `history` is the message list from a previous run (without the system
    /// prompt); the updated list is returned so callers can maintain multi-turn
    /// state without the core owning it.
    pub async fn process_with_history(
        &self,
        history: Vec<ChatMessage>,
        query: &str,
    ) -> Result<(OrchestratorResult, Vec<ChatMessage>)> {
        tracing::info!(query, "processing query");

        let mut conversation = history;
        conversation.push(ChatMessage::user(query));

        let mut messages = vec![ChatMessage::system(system_prompt(Local::now().date_naive()))];
        messages.extend(conversation.iter().cloned());

        for round in 0..self.max_iterations {
            let assistant = match self.provider.invoke_chat(&messages, &self.tools).await {
                Ok(message) => message,
                Err(e) => {
                    // The agent surface never raises: report the failure as the
                    // final answer.
                    tracing::error!(error = %e, "provider call failed");
                    let failure = ChatMessage::assistant(
                        crate::llm::MessageContent::Text(format!(
                            "処理中にエラーが発生しました: {e}"
                        )),
                        Vec::new(),
                    );
                    conversation.push(failure.clone());
                    messages.push(failure);
                    break;
                }
            };

            messages.push(assistant.clone());
            conversation.push(assistant.clone());

            if assistant.tool_calls.is_empty() {
                break;
            }
            if round + 1 == self.max_iterations {
                tracing::warn!("iteration cap reached with pending tool calls");
                break;
            }

            for call in &assistant.tool_calls {
                let output = match self.runtime.execute(&call.name, call.arguments.clone()).await
                {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(tool = call.name, error = %e, "tool failed");
                        serde_json::json!({ "error": e.to_string() })
                    }
                };
                let serialized =
                    serde_json::to_string(&output).unwrap_or_else(|_| "{}".to_string());
                let tool_message = ChatMessage::tool_result(call.id.clone(), serialized);
                messages.push(tool_message.clone());
                conversation.push(tool_message);
            }
        }

        let result = parse_result(query, &conversation);
        Ok((result, conversation))
    }
}

/// Folds the final conversation state into an [`OrchestratorResult`].
pub(crate) fn parse_result(query: &str, messages: &[ChatMessage]) -> OrchestratorResult {
    let mut tools_used: Vec<String> = Vec::new();
    for message in messages {
        for call in &message.tool_calls {
            if !tools_used.iter().any(|name| name == &call.name) {
                tools_used.push(call.name.clone());
            }
        }
    }

    let intent = infer_intent(&tools_used);

    let result = messages
        .last()
        .map(ChatMessage::normalized_text)
        .unwrap_or_default();

    let documents = harvest_documents(messages);

    OrchestratorResult {
        query: query.to_string(),
        intent,
        result,
        tools_used,
        documents,
    }
}

/// Maps the used-tool set to an intent label, most specific first.
fn infer_intent(tools_used: &[String]) -> String {
    let used = |name: &str| tools_used.iter().any(|t| t == name);

    if used("analyze_document") {
        "分析".to_string()
    } else if used("compare_documents") {
        "比較".to_string()
    } else if used("summarize_document") {
        "要約".to_string()
    } else if used("download_document") {
        "取得".to_string()
    } else if used("fetch_ir_documents") || used("fetch_ir_news") || used("explore_ir_page") {
        "IR".to_string()
    } else if used("search_documents") || used("search_company") {
        "検索".to_string()
    } else {
        "その他".to_string()
    }
}

/// Collects [`DocumentInfo`] records from tool messages whose JSON content carries
/// a `metadata` object with a `doc_id`. Non-JSON content is silently skipped.
fn harvest_documents(messages: &[ChatMessage]) -> Vec<DocumentInfo> {
    let mut documents = Vec::new();

    for message in messages {
        if message.role != ChatRole::Tool {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(&message.normalized_text()) else {
            continue;
        };
        let Some(metadata) = value.get("metadata").and_then(Value::as_object) else {
            continue;
        };
        let Some(doc_id) = metadata.get("doc_id").and_then(Value::as_str) else {
            continue;
        };

        let field = |name: &str| {
            metadata
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
        };

        documents.push(DocumentInfo {
            doc_id: doc_id.to_string(),
            sec_code: field("sec_code"),
            filer_name: field("filer_name"),
            doc_type_code: field("doc_type_code"),
            period_start: field("period_start"),
            period_end: field("period_end"),
            doc_description: field("doc_description"),
        });
    }

    documents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ContentBlock, MessageContent, ToolCall};
    use serde_json::json;

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: format!("call_{name}"),
            name: name.to_string(),
            arguments: json!({}),
        }
    }

    #[test]
    fn tools_used_is_first_occurrence_deduplicated() {
        let messages = vec![
            ChatMessage::user("q"),
            ChatMessage::assistant(
                MessageContent::Null,
                vec![call("search_company"), call("search_documents")],
            ),
            ChatMessage::assistant(
                MessageContent::Null,
                vec![call("search_documents"), call("download_document")],
            ),
            ChatMessage::assistant(MessageContent::Text("done".into()), Vec::new()),
        ];

        let result = parse_result("q", &messages);
        assert_eq!(
            result.tools_used,
            vec!["search_company", "search_documents", "download_document"]
        );
        assert_eq!(result.intent, "取得");
        assert_eq!(result.result, "done");
    }

    #[test]
    fn intent_priority_order() {
        assert_eq!(infer_intent(&["search_documents".into(), "analyze_document".into()]), "分析");
        assert_eq!(infer_intent(&["summarize_document".into(), "search_company".into()]), "要約");
        assert_eq!(infer_intent(&["fetch_ir_documents".into()]), "IR");
        assert_eq!(infer_intent(&["search_company".into()]), "検索");
        assert_eq!(infer_intent(&[]), "その他");
    }

    #[test]
    fn multipart_content_normalizes_to_joined_text() {
        let messages = vec![
            ChatMessage::user("q"),
            ChatMessage::assistant(
                MessageContent::Blocks(vec![
                    ContentBlock::Text { text: "Toyota".into() },
                    ContentBlock::ToolUse { id: "t1".into(), name: "x".into() },
                    ContentBlock::Text { text: "found".into() },
                ]),
                Vec::new(),
            ),
        ];
        let result = parse_result("q", &messages);
        assert_eq!(result.result, "Toyota\nfound");
        assert!(result.documents.is_empty());
    }

    #[test]
    fn document_harvest_requires_metadata_doc_id() {
        let messages = vec![
            ChatMessage::tool_result(
                "c1",
                json!({
                    "file_path": "downloads/x.pdf",
                    "metadata": { "doc_id": "S100ABCD", "sec_code": "72030" }
                })
                .to_string(),
            ),
            ChatMessage::tool_result("c2", json!({ "count": 0 }).to_string()),
            ChatMessage::tool_result("c3", "plain text, not JSON"),
        ];

        let documents = harvest_documents(&messages);
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].doc_id, "S100ABCD");
        assert_eq!(documents[0].sec_code.as_deref(), Some("72030"));
        assert!(documents[0].filer_name.is_none());
    }

    #[test]
    fn empty_conversation_never_panics() {
        let result = parse_result("q", &[]);
        assert_eq!(result.result, "");
        assert_eq!(result.intent, "その他");
        assert!(result.tools_used.is_empty());
    }
}
