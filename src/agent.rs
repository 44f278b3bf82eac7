//! Tool-using agent.
//!
//! The agent sees only the candidate tools the [`ToolRegistry`] retrieved for
//! the conversation. Each step the model answers with a small JSON decision
//! naming one candidate (or `"none"` to stop):
//!
//! ```json
//! {"tool": "vector_tool_report", "query": "revenue in 2023", "page_numbers": ["4"]}
//! ```
//!
//! The chosen tool is resolved through [`ToolRegistry::get`] and executed;
//! its output becomes an observation for the next step. A reply with no JSON
//! object at all is taken as the model's final answer. Otherwise, after at
//! most `max_tool_calls` invocations the final answer is streamed under the
//! agent system prompt.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::error::ChatError;
use crate::llm::{ChatMessage, DeltaStream};
use crate::registry::ToolRegistry;
use crate::tools::{Tool, ToolCall, ToolContext};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an agent designed to answer queries over a set of given documents. \
Please always use the tools provided to answer a question. Do not rely on prior knowledge. \
Make sure your final response is appropriate for an end business user. \
Your response should not mention the tools used but provide a useable summary of what you have found.";

/// Tool name the model uses to signal it has enough information.
const FINISH: &str = "none";

/// One step chosen by the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Call { tool: String, call: ToolCall },
    Finish,
    /// The model answered in prose instead of choosing a tool.
    Answer(String),
}

/// Output of one tool invocation.
#[derive(Debug, Clone)]
pub struct Observation {
    pub tool: String,
    pub call: ToolCall,
    pub output: String,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    page_numbers: Vec<Value>,
}

pub struct ToolAgent {
    system_prompt: String,
    max_tool_calls: usize,
    tool_top_k: usize,
}

impl ToolAgent {
    pub fn new(config: &AgentConfig, tool_top_k: usize) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            max_tool_calls: config.max_tool_calls,
            tool_top_k,
        }
    }

    /// Answer `question` given the flattened conversation `history`.
    ///
    /// Returns the stream of the final answer; tool failures and invalid
    /// decisions abort the run with the corresponding error.
    pub async fn run(
        &self,
        registry: &ToolRegistry,
        ctx: &ToolContext,
        history: &str,
        question: &str,
    ) -> Result<DeltaStream, ChatError> {
        if registry.is_empty() {
            return Err(ChatError::RegistryEmpty);
        }

        let candidates = registry.retrieve(history, self.tool_top_k).await?;
        debug!(
            candidates = ?candidates.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "retrieved candidate tools"
        );

        let (observations, answer) = self
            .gather(registry, ctx, &candidates, history, question)
            .await?;
        if let Some(answer) = answer {
            debug!(tool_calls = observations.len(), "agent answered directly");
            return Ok(DeltaStream::from_deltas([answer]));
        }

        let messages = [
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(answer_prompt(history, &observations)),
        ];
        ctx.model.stream_chat(&messages).await
    }

    async fn gather(
        &self,
        registry: &ToolRegistry,
        ctx: &ToolContext,
        candidates: &[Arc<dyn Tool>],
        history: &str,
        question: &str,
    ) -> Result<(Vec<Observation>, Option<String>), ChatError> {
        let mut observations: Vec<Observation> = Vec::new();

        while observations.len() < self.max_tool_calls {
            let prompt = decision_prompt(candidates, history, &observations);
            let messages = [
                ChatMessage::system(self.system_prompt.clone()),
                ChatMessage::user(prompt),
            ];
            let reply = ctx.model.complete(&messages).await?;

            let (tool_name, call) = match parse_decision(&reply, question)? {
                Decision::Finish => break,
                Decision::Answer(text) => return Ok((observations, Some(text))),
                Decision::Call { tool, call } => (tool, call),
            };

            if !candidates.iter().any(|t| t.name() == tool_name) {
                return Err(ChatError::tool(
                    &tool_name,
                    "not among the tools offered for this query",
                ));
            }
            if observations
                .iter()
                .any(|o| o.tool == tool_name && o.call == call)
            {
                debug!(tool = %tool_name, "repeated tool call, finishing");
                break;
            }
            let tool = registry
                .get(&tool_name)
                .ok_or_else(|| ChatError::tool(&tool_name, "unknown tool"))?;

            info!(tool = %tool_name, query = %call.query, pages = ?call.page_numbers, "agent calling tool");
            let output = tool.execute(&call, ctx).await?;
            observations.push(Observation {
                tool: tool_name,
                call,
                output,
            });
        }

        Ok((observations, None))
    }
}

/// Parse the model's JSON decision.
///
/// The object may be wrapped in prose or a code fence; everything between
/// the first `{` and the last `}` is parsed. A reply without any braces is a
/// final [`Decision::Answer`] (or [`Decision::Finish`] when blank). A missing
/// `query` falls back to `default_query`. Page numbers may be strings or
/// integers.
pub fn parse_decision(reply: &str, default_query: &str) -> Result<Decision, ChatError> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &reply[s..=e],
        (None, None) => {
            let text = reply.trim();
            return Ok(if text.is_empty() {
                Decision::Finish
            } else {
                Decision::Answer(text.to_string())
            });
        }
        _ => {
            return Err(ChatError::MalformedResponse(format!(
                "expected a JSON tool decision, got: {}",
                reply.trim()
            )))
        }
    };

    let raw: RawDecision = serde_json::from_str(json)
        .map_err(|e| ChatError::MalformedResponse(format!("invalid tool decision: {}", e)))?;

    let tool = match raw.tool.as_deref().map(str::trim) {
        None | Some("") => return Ok(Decision::Finish),
        Some(name) if name.eq_ignore_ascii_case(FINISH) => return Ok(Decision::Finish),
        Some(name) => name.to_string(),
    };

    let query = raw
        .query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| default_query.to_string());

    let mut pages = Vec::with_capacity(raw.page_numbers.len());
    for value in raw.page_numbers {
        match value {
            Value::String(s) => pages.push(s),
            Value::Number(n) => pages.push(n.to_string()),
            other => {
                return Err(ChatError::MalformedResponse(format!(
                    "invalid page number: {}",
                    other
                )))
            }
        }
    }

    Ok(Decision::Call {
        tool,
        call: ToolCall::new(query).with_pages(pages),
    })
}

fn decision_prompt(candidates: &[Arc<dyn Tool>], history: &str, observations: &[Observation]) -> String {
    let mut out = String::from("You can use the following tools:\n");
    for tool in candidates {
        out.push_str(&format!(
            "- {}: {}\n  arguments: {}\n",
            tool.name(),
            tool.description(),
            tool.parameters_schema()
        ));
    }

    out.push_str("\nConversation:\n");
    out.push_str(history);
    out.push('\n');

    if !observations.is_empty() {
        out.push_str("\nObservations so far:\n");
        push_observations(&mut out, observations);
    }

    out.push_str(
        "\nDecide the next step. Reply with a single JSON object and nothing else:\n\
         {\"tool\": \"<tool name>\", \"query\": \"<input for the tool>\", \"page_numbers\": []}\n\
         Use only the tool names listed above. \
         If the observations already answer the question, reply {\"tool\": \"none\"}.",
    );
    out
}

fn answer_prompt(history: &str, observations: &[Observation]) -> String {
    let mut out = String::from("Conversation:\n");
    out.push_str(history);
    out.push('\n');
    if observations.is_empty() {
        out.push_str("\nNo tool returned any information.\n");
    } else {
        out.push_str("\nInformation found:\n");
        push_observations(&mut out, observations);
    }
    out.push_str("\nAnswer the last user message.");
    out
}

fn push_observations(out: &mut String, observations: &[Observation]) {
    for obs in observations {
        out.push_str(&format!("[{}] {}\n", obs.tool, obs.output.trim()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_decision() {
        let d = parse_decision(
            r#"{"tool": "vector_tool_report", "query": "revenue", "page_numbers": ["2"]}"#,
            "fallback",
        )
        .unwrap();
        assert_eq!(
            d,
            Decision::Call {
                tool: "vector_tool_report".to_string(),
                call: ToolCall::new("revenue").with_pages(vec!["2".to_string()]),
            }
        );
    }

    #[test]
    fn test_parse_decision_inside_fence() {
        let reply = "Sure.\n```json\n{\"tool\": \"summary_tool_report\"}\n```";
        match parse_decision(reply, "summarize it").unwrap() {
            Decision::Call { tool, call } => {
                assert_eq!(tool, "summary_tool_report");
                assert_eq!(call.query, "summarize it");
                assert!(call.page_numbers.is_empty());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_numeric_pages() {
        match parse_decision(r#"{"tool":"vector_tool_a","page_numbers":[1, "3"]}"#, "q").unwrap() {
            Decision::Call { call, .. } => assert_eq!(call.page_numbers, vec!["1", "3"]),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_finish() {
        assert_eq!(parse_decision(r#"{"tool": "none"}"#, "q").unwrap(), Decision::Finish);
        assert_eq!(parse_decision(r#"{"tool": null}"#, "q").unwrap(), Decision::Finish);
    }

    #[test]
    fn test_parse_prose_is_answer() {
        assert_eq!(
            parse_decision("  The main risk was vendor delays.\n", "q").unwrap(),
            Decision::Answer("The main risk was vendor delays.".to_string())
        );
        assert_eq!(parse_decision("   ", "q").unwrap(), Decision::Finish);
    }

    #[test]
    fn test_parse_rejects_broken_json() {
        let err = parse_decision("{tool: vector_tool_report}", "q").unwrap_err();
        assert!(matches!(err, ChatError::MalformedResponse(_)));
        let err = parse_decision("use {\"tool\": \"x\"", "q").unwrap_err();
        assert!(matches!(err, ChatError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_rejects_bad_page() {
        let err = parse_decision(r#"{"tool":"x","page_numbers":[{"p":1}]}"#, "q").unwrap_err();
        assert!(matches!(err, ChatError::MalformedResponse(_)));
    }

    #[test]
    fn test_answer_prompt_lists_observations() {
        let obs = vec![Observation {
            tool: "vector_tool_report".to_string(),
            call: ToolCall::new("q"),
            output: "Revenue grew 12%.\n".to_string(),
        }];
        let prompt = answer_prompt("User: how did revenue change?", &obs);
        assert!(prompt.contains("[vector_tool_report] Revenue grew 12%."));
        assert!(prompt.starts_with("Conversation:\nUser: how did revenue change?"));
    }
}
