//! Streaming ReAct agent with tool-call interrupts
//!
//! Consumes the model's token stream and watches the growing buffer for the
//! pattern `Action: ... Action Input: ... Observation:` with an empty
//! observation slot. When it appears the upstream stream is interrupted, the
//! tool is executed, and a structured observation analysis (status, size
//! bucket, result shape, guidance hint, plus a capped raw excerpt) is
//! appended to the transcript before generation resumes. Resumption recurses
//! at most [`MAX_INTERRUPT_DEPTH`] times.

use crate::error::ReactError;
use crate::parser::ReactParser;
use agentgraph_core::{GenerateOptions, InterruptPredicate, LanguageModel, Message, ToolRegistry};
use futures::future::BoxFuture;
use futures::FutureExt;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Cap on interrupt-resume recursion. Inherited from the reference
/// behaviour; raise it for workflows with very long tool chains.
pub const MAX_INTERRUPT_DEPTH: usize = 10;

/// Raw tool output attached to an observation is capped at this many chars
const RAW_EXCERPT_LIMIT: usize = 3000;

/// Events emitted while streaming a ReAct turn
#[derive(Debug, Clone)]
pub enum ReactStreamEvent {
    /// A content chunk from the model
    Chunk { content: String, depth: usize },
    /// Generation was interrupted to execute this tool
    ToolStart { tool: String, depth: usize },
    /// The analysed observation appended to the transcript
    Observation {
        tool: String,
        analysis: String,
        depth: usize,
    },
    /// A `Final Answer:` was found in the finished buffer
    FinalAnswer { answer: String },
    /// Recoverable problem; generation continues or ends gracefully
    Error { message: String },
    /// Stream finished; the full accumulated content of the last turn
    Done { content: String },
}

/// Size bucket of a tool result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeBucket {
    Empty,
    Small,
    Medium,
    Large,
}

/// Rough shape of a tool result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Json,
    MultiLine,
    SingleLine,
}

/// Structured summary of a tool execution, rendered into the transcript in
/// place of the raw output dump
#[derive(Debug, Clone)]
pub struct ObservationAnalysis {
    pub tool: String,
    pub success: bool,
    pub size: SizeBucket,
    pub shape: ResultShape,
    /// `true` suggests wrapping up rather than continuing to act
    pub suggest_summarise: bool,
    pub excerpt: String,
}

impl ObservationAnalysis {
    pub fn from_result(tool: &str, result: &Result<Value, String>) -> Self {
        let (success, text) = match result {
            Ok(value) => (
                true,
                match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                },
            ),
            Err(error) => (false, error.clone()),
        };

        let size = match text.trim().len() {
            0 => SizeBucket::Empty,
            n if n < 100 => SizeBucket::Small,
            n if n < 1000 => SizeBucket::Medium,
            _ => SizeBucket::Large,
        };

        let shape = if serde_json::from_str::<Value>(text.trim())
            .map(|v| v.is_object() || v.is_array())
            .unwrap_or(false)
        {
            ResultShape::Json
        } else if text.contains('\n') {
            ResultShape::MultiLine
        } else {
            ResultShape::SingleLine
        };

        let excerpt = if text.len() > RAW_EXCERPT_LIMIT {
            let mut cut = RAW_EXCERPT_LIMIT;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}...[truncated]", &text[..cut])
        } else {
            text
        };

        Self {
            tool: tool.to_string(),
            success,
            size,
            shape,
            suggest_summarise: size == SizeBucket::Large,
            excerpt,
        }
    }

    /// Render as the observation line appended to the transcript
    pub fn render(&self) -> String {
        let status = if self.success { "succeeded" } else { "failed" };
        let size = match self.size {
            SizeBucket::Empty => "empty",
            SizeBucket::Small => "small",
            SizeBucket::Medium => "medium",
            SizeBucket::Large => "large",
        };
        let shape = match self.shape {
            ResultShape::Json => "structured JSON",
            ResultShape::MultiLine => "multi-line text",
            ResultShape::SingleLine => "single-line text",
        };
        let guidance = if self.suggest_summarise {
            "consider summarising toward the final answer"
        } else {
            "continue reasoning toward the final answer"
        };

        format!(
            "tool {} {}; {} result, {} size; {}.\n{}",
            self.tool, status, shape, size, guidance, self.excerpt
        )
    }
}

/// Interrupt predicate: a complete `Action:`/`Action Input:` pair whose
/// trailing `Observation:` slot is still empty at the end of the buffer
pub fn should_interrupt_for_observation(content: &str) -> bool {
    if !content.contains("Action:") || !content.contains("Action Input:") {
        return false;
    }
    match content.rfind("Observation:") {
        Some(position) => content[position + "Observation:".len()..].trim().is_empty(),
        None => false,
    }
}

/// Streaming variant of the ReAct controller
#[derive(Clone)]
pub struct StreamingReactAgent {
    llm: Arc<dyn LanguageModel>,
    tools: Option<Arc<dyn ToolRegistry>>,
    parser: ReactParser,
}

impl StreamingReactAgent {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            tools: None,
            parser: ReactParser::new(),
        }
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Stream a single query; the returned stream ends with `Done`
    pub fn stream_run(&self, query: &str) -> ReceiverStream<ReactStreamEvent> {
        let (tx, rx) = mpsc::channel(64);
        let agent = self.clone();
        let messages = vec![
            Message::system(
                "You are an assistant that solves tasks with the ReAct format: \
                 Thought / Action / Action Input / Observation lines, then a \
                 Final Answer. Stop after writing 'Observation:' and wait for \
                 the result.",
            ),
            Message::user(query),
        ];

        tokio::spawn(async move {
            agent.drive(messages, 0, tx).await;
        });

        ReceiverStream::new(rx)
    }

    /// One streamed generation turn, recursing on every tool interrupt
    fn drive(
        self,
        messages: Vec<Message>,
        depth: usize,
        tx: mpsc::Sender<ReactStreamEvent>,
    ) -> BoxFuture<'static, ()> {
        async move {
            if depth > MAX_INTERRUPT_DEPTH {
                warn!(depth, "Interrupt recursion limit reached");
                let _ = tx
                    .send(ReactStreamEvent::Error {
                        message: ReactError::MaxDepth(MAX_INTERRUPT_DEPTH).to_string(),
                    })
                    .await;
                let _ = tx
                    .send(ReactStreamEvent::Done {
                        content: "the tool-call chain grew too deep; stopping here".to_string(),
                    })
                    .await;
                return;
            }

            let interrupt: InterruptPredicate = Arc::new(should_interrupt_for_observation);
            let stream = self
                .llm
                .stream_generate(&messages, &GenerateOptions::new(), Some(interrupt))
                .await;

            let mut stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx
                        .send(ReactStreamEvent::Error {
                            message: format!("LLM stream failed: {}", e),
                        })
                        .await;
                    return;
                }
            };

            let mut buffer = String::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(content) => {
                        buffer.push_str(&content);
                        let _ = tx
                            .send(ReactStreamEvent::Chunk {
                                content,
                                depth,
                            })
                            .await;
                    }
                    Err(e) => {
                        let _ = tx
                            .send(ReactStreamEvent::Error {
                                message: format!("stream chunk error: {}", e),
                            })
                            .await;
                        break;
                    }
                }
            }
            drop(stream);

            if should_interrupt_for_observation(&buffer) {
                self.handle_interrupt(buffer, messages, depth, tx).await;
                return;
            }

            let parsed = self.parser.parse(&buffer);
            if let Some(answer) = parsed.final_answer {
                if !answer.trim().is_empty() {
                    let _ = tx.send(ReactStreamEvent::FinalAnswer { answer }).await;
                }
            }
            let _ = tx.send(ReactStreamEvent::Done { content: buffer }).await;
        }
        .boxed()
    }

    async fn handle_interrupt(
        self,
        buffer: String,
        messages: Vec<Message>,
        depth: usize,
        tx: mpsc::Sender<ReactStreamEvent>,
    ) {
        let parsed = self.parser.parse(&buffer);

        let observation = match (&parsed.action, &self.tools) {
            (Some(action), Some(tools)) => {
                debug!(tool = %action.tool, depth, "Interrupting stream for tool call");
                let _ = tx
                    .send(ReactStreamEvent::ToolStart {
                        tool: action.tool.clone(),
                        depth,
                    })
                    .await;

                let result = tools
                    .execute(&action.tool, action.input.clone())
                    .await
                    .map_err(|e| e.to_string());
                let analysis = ObservationAnalysis::from_result(&action.tool, &result);
                let rendered = analysis.render();

                let _ = tx
                    .send(ReactStreamEvent::Observation {
                        tool: action.tool.clone(),
                        analysis: rendered.clone(),
                        depth,
                    })
                    .await;
                rendered
            }
            (None, _) => {
                warn!("Interrupt fired but the action was unparsable");
                "the requested action could not be parsed; \
                 write a corrected Action line or give a Final Answer"
                    .to_string()
            }
            (_, None) => {
                warn!("Interrupt fired with no tool registry attached");
                "no tool manager is available; answer from what you already know"
                    .to_string()
            }
        };

        // Resume with the buffer and its observation folded into the
        // conversation as the assistant's partial turn
        let mut next_messages = messages;
        next_messages.push(Message::assistant(format!(
            "{} {}",
            buffer.trim_end(),
            observation
        )));

        self.drive(next_messages, depth + 1, tx).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgraph_core::{GraphError, ToolInfo, TokenStream};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Streams scripted turns chunk by chunk, honoring the interrupt
    /// predicate exactly like a real provider would.
    struct ScriptedStreamLlm {
        turns: Vec<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedStreamLlm {
        fn new(turns: Vec<Vec<&str>>) -> Self {
            Self {
                turns: turns
                    .into_iter()
                    .map(|turn| turn.into_iter().map(str::to_string).collect())
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedStreamLlm {
        async fn generate(
            &self,
            _messages: &[Message],
            _options: &GenerateOptions,
        ) -> agentgraph_core::Result<Message> {
            Err(GraphError::Llm("use stream_generate".to_string()))
        }

        async fn stream_generate(
            &self,
            _messages: &[Message],
            _options: &GenerateOptions,
            interrupt: Option<InterruptPredicate>,
        ) -> agentgraph_core::Result<TokenStream> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            let chunks = self
                .turns
                .get(index.min(self.turns.len().saturating_sub(1)))
                .cloned()
                .unwrap_or_default();

            let stream = async_stream::stream! {
                let mut buffer = String::new();
                for chunk in chunks {
                    buffer.push_str(&chunk);
                    yield Ok(chunk);
                    if let Some(predicate) = &interrupt {
                        if predicate(&buffer) {
                            break;
                        }
                    }
                }
            };
            Ok(Box::pin(stream))
        }
    }

    struct AdderTools;

    #[async_trait]
    impl ToolRegistry for AdderTools {
        async fn list_tools(&self) -> Vec<ToolInfo> {
            vec![ToolInfo::new("math_add", "Add", json!({}))]
        }

        async fn execute(&self, _name: &str, arguments: Value) -> agentgraph_core::Result<Value> {
            let a = arguments["a"].as_i64().unwrap_or(0);
            let b = arguments["b"].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        }
    }

    #[test]
    fn test_interrupt_predicate() {
        assert!(should_interrupt_for_observation(
            "Thought: x\nAction: t\nAction Input: {}\nObservation:"
        ));
        assert!(should_interrupt_for_observation(
            "Action: t\nAction Input: {}\nObservation:\n"
        ));
        assert!(!should_interrupt_for_observation(
            "Action: t\nAction Input: {}\nObservation: already filled"
        ));
        assert!(!should_interrupt_for_observation("Thought: no action yet"));
        assert!(!should_interrupt_for_observation(
            "Action: t\nObservation:"
        ));
    }

    #[test]
    fn test_observation_analysis_buckets() {
        let empty = ObservationAnalysis::from_result("t", &Ok(json!("")));
        assert_eq!(empty.size, SizeBucket::Empty);

        let small = ObservationAnalysis::from_result("t", &Ok(json!("short")));
        assert_eq!(small.size, SizeBucket::Small);
        assert_eq!(small.shape, ResultShape::SingleLine);
        assert!(!small.suggest_summarise);

        let large_text: String = "x".repeat(5000);
        let large = ObservationAnalysis::from_result("t", &Ok(Value::String(large_text)));
        assert_eq!(large.size, SizeBucket::Large);
        assert!(large.suggest_summarise);
        assert!(large.excerpt.len() <= RAW_EXCERPT_LIMIT + "...[truncated]".len());
        assert!(large.excerpt.ends_with("...[truncated]"));

        let json_result = ObservationAnalysis::from_result("t", &Ok(json!({"rows": [1, 2]})));
        assert_eq!(json_result.shape, ResultShape::Json);

        let failed = ObservationAnalysis::from_result("t", &Err("boom".to_string()));
        assert!(!failed.success);
        assert!(failed.render().contains("failed"));
    }

    #[tokio::test]
    async fn test_stream_with_tool_interrupt_and_resume() {
        let llm = Arc::new(ScriptedStreamLlm::new(vec![
            vec![
                "Thought: need the sum.\n",
                "Action: math_add\n",
                "Action Input: {\"a\":2,\"b\":3}\n",
                "Observation:",
                "SHOULD NEVER STREAM",
            ],
            vec!["Final Answer: 5"],
        ]));

        let agent = StreamingReactAgent::new(llm).with_tools(Arc::new(AdderTools));
        let mut events = agent.stream_run("add 2 and 3");

        let mut tool_starts = 0;
        let mut observations = Vec::new();
        let mut final_answer = None;
        let mut done = None;
        let mut leaked_past_interrupt = false;

        while let Some(event) = events.next().await {
            match event {
                ReactStreamEvent::Chunk { content, .. } => {
                    if content.contains("SHOULD NEVER STREAM") {
                        leaked_past_interrupt = true;
                    }
                }
                ReactStreamEvent::ToolStart { .. } => tool_starts += 1,
                ReactStreamEvent::Observation { analysis, .. } => observations.push(analysis),
                ReactStreamEvent::FinalAnswer { answer } => final_answer = Some(answer),
                ReactStreamEvent::Done { content } => done = Some(content),
                ReactStreamEvent::Error { message } => panic!("unexpected error: {}", message),
            }
        }

        assert!(!leaked_past_interrupt);
        assert_eq!(tool_starts, 1);
        assert_eq!(observations.len(), 1);
        assert!(observations[0].contains("math_add succeeded"));
        assert!(observations[0].contains('5'));
        assert_eq!(final_answer.as_deref(), Some("5"));
        assert!(done.is_some());
    }

    #[tokio::test]
    async fn test_recursion_depth_is_capped() {
        // Every turn requests another tool call; recursion must stop
        let llm = Arc::new(ScriptedStreamLlm::new(vec![vec![
            "Thought: again.\nAction: math_add\nAction Input: {\"a\":1,\"b\":1}\nObservation:",
        ]]));

        let agent = StreamingReactAgent::new(llm).with_tools(Arc::new(AdderTools));
        let mut events = agent.stream_run("loop forever");

        let mut saw_depth_error = false;
        let mut observations = 0;
        while let Some(event) = events.next().await {
            match event {
                ReactStreamEvent::Observation { .. } => observations += 1,
                ReactStreamEvent::Error { message } => {
                    saw_depth_error = message.contains("depth");
                }
                _ => {}
            }
        }

        assert!(saw_depth_error);
        assert_eq!(observations, MAX_INTERRUPT_DEPTH + 1);
    }

    #[tokio::test]
    async fn test_missing_tools_yields_diagnostic_and_resume() {
        let llm = Arc::new(ScriptedStreamLlm::new(vec![
            vec!["Action: anything\nAction Input: {}\nObservation:"],
            vec!["Final Answer: answered without tools"],
        ]));

        let agent = StreamingReactAgent::new(llm);
        let mut events = agent.stream_run("q");

        let mut final_answer = None;
        while let Some(event) = events.next().await {
            if let ReactStreamEvent::FinalAnswer { answer } = event {
                final_answer = Some(answer);
            }
        }

        assert_eq!(final_answer.as_deref(), Some("answered without tools"));
    }
}
