//! ReAct loop controller
//!
//! Drives the Thought -> Action -> Observation loop against a
//! [`LanguageModel`], dispatching actions through a [`ToolRegistry`] and
//! feeding results back as observations. Every exit path produces a final
//! answer: a direct `Final Answer:`, a summarising turn once the iteration
//! bound is hit, or a graceful apology after three consecutive empty
//! thoughts.
//!
//! Tool failures become observations of the form `tool <name> failed: <err>`
//! and never abort the loop; LLM transport failures are fatal unless the
//! caller wraps the model in a retry layer.

use crate::error::{ReactError, Result};
use crate::parser::{ActionCall, ParsedResponse, ReactParser};
use agentgraph_core::{GenerateOptions, LanguageModel, Message, ToolRegistry};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Consecutive empty thoughts tolerated before giving up gracefully
const EMPTY_THOUGHT_LIMIT: usize = 3;

/// Final answer used when the model never produced a usable thought
pub const NO_THOUGHT_ANSWER: &str = "未能开始有效的思考过程。请检查问题描述或提供更明确的指导。";

/// Per-request loop record
#[derive(Debug, Default, Serialize)]
pub struct ReactLoop {
    pub thoughts: Vec<String>,
    #[serde(skip)]
    pub actions: Vec<ActionCall>,
    pub observations: Vec<String>,
    pub iteration: usize,
    pub empty_thought_count: usize,
    pub completed: bool,
    pub final_answer: String,
}

impl ReactLoop {
    fn complete(&mut self, answer: impl Into<String>) {
        self.final_answer = answer.into();
        self.completed = true;
    }
}

/// Outcome of one controller run
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub query: String,
    pub result: String,
    pub success: bool,
    pub iterations: usize,
    pub tool_calls: usize,
    pub metadata: Value,
}

/// Configuration builder for [`ReactAgent`]
pub struct ReactAgentConfig {
    llm: Arc<dyn LanguageModel>,
    tools: Option<Arc<dyn ToolRegistry>>,
    max_iterations: usize,
    temperature: Option<f32>,
}

impl ReactAgentConfig {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            tools: None,
            max_iterations: 10,
            temperature: None,
        }
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn build(self) -> ReactAgent {
        ReactAgent {
            llm: self.llm,
            tools: self.tools,
            max_iterations: self.max_iterations,
            temperature: self.temperature,
            parser: ReactParser::new(),
        }
    }
}

/// Create a ReAct agent over the given model
pub fn create_react_agent(llm: Arc<dyn LanguageModel>) -> ReactAgentConfig {
    ReactAgentConfig::new(llm)
}

/// The loop controller
pub struct ReactAgent {
    llm: Arc<dyn LanguageModel>,
    tools: Option<Arc<dyn ToolRegistry>>,
    max_iterations: usize,
    temperature: Option<f32>,
    parser: ReactParser,
}

impl ReactAgent {
    /// Run the loop for one user query
    pub async fn run(&self, query: &str) -> Result<TaskResult> {
        let task_id = Uuid::new_v4().to_string();
        let mut react_loop = ReactLoop::default();
        let mut messages = vec![Message::user(query)];

        let tool_lines = match &self.tools {
            Some(tools) => tools
                .list_tools()
                .await
                .iter()
                .map(|info| format!("- {}", info.prompt_line()))
                .collect::<Vec<_>>()
                .join("\n"),
            None => String::new(),
        };

        info!(task_id = %task_id, query, "ReAct run started");

        while react_loop.iteration < self.max_iterations {
            let system_prompt = self.build_system_prompt(query, &tool_lines, &react_loop);
            let response = self.call_llm(&system_prompt, &messages).await?;
            react_loop.iteration += 1;

            let parsed = self.parser.parse(&response);

            if parsed.has_empty_thought && !parsed.has_final_answer() {
                react_loop.empty_thought_count += 1;
                warn!(
                    count = react_loop.empty_thought_count,
                    "Empty thought detected"
                );

                if react_loop.empty_thought_count >= EMPTY_THOUGHT_LIMIT {
                    react_loop.complete(format!(
                        "抱歉，我在思考您的问题时遇到了困难。您的问题是：{}。请尝试重新描述问题或提供更多上下文信息。",
                        query
                    ));
                    break;
                }

                messages.push(Message::user(format!(
                    "Your reply must contain a concrete thought after 'Thought:'. \
                     For example:\nThought: I need to analyse the question: {}. It requires...",
                    query
                )));
                continue;
            }
            // A non-empty thought resets the strike counter
            if !parsed.has_empty_thought {
                react_loop.empty_thought_count = 0;
            }

            if parsed.has_final_answer() {
                let answer = parsed.final_answer.clone().unwrap_or_default();
                info!(answer = %answer, "Final answer produced");
                react_loop.complete(answer);
                break;
            }

            if let Some(thought) = &parsed.thought {
                if !thought.is_empty() {
                    debug!(thought = %thought, "Recorded thought");
                    react_loop.thoughts.push(thought.clone());
                }
            }

            if let Some(action) = &parsed.action {
                react_loop.actions.push(action.clone());
                let observation = self.execute_action(action).await;
                debug!(tool = %action.tool, observation = %observation, "Recorded observation");
                react_loop.observations.push(observation.clone());

                messages.push(Message::assistant(&response));
                messages.push(Message::user(format!("Observation: {}", observation)));
            } else if parsed.thought.is_some() {
                messages.push(Message::assistant(&response));
            } else {
                messages.push(Message::assistant(&response));
                messages.push(Message::user(
                    "Continue reasoning and decide the next action, or give the final answer.",
                ));
            }
        }

        // Bound hit without an answer: one summarising turn
        if !react_loop.completed {
            let answer = if react_loop.thoughts.is_empty() {
                NO_THOUGHT_ANSWER.to_string()
            } else {
                messages.push(Message::user(
                    "Based on the reasoning so far, provide a concluding answer. \
                     If no firm conclusion is possible, say why and suggest a next step.",
                ));
                match self
                    .call_llm("Summarise the reasoning so far into a clear answer.", &messages)
                    .await
                {
                    Ok(summary) => summary.trim().to_string(),
                    Err(e) => format!("思考过程中遇到问题: {}。建议重新描述问题或提供更多信息。", e),
                }
            };
            react_loop.complete(answer);
        }

        let success = react_loop.final_answer != NO_THOUGHT_ANSWER;
        Ok(TaskResult {
            task_id,
            query: query.to_string(),
            result: react_loop.final_answer.clone(),
            success,
            iterations: react_loop.iteration,
            tool_calls: react_loop.actions.len(),
            metadata: json!({
                "thoughts": react_loop.thoughts,
                "observations": react_loop.observations,
                "empty_thought_count": react_loop.empty_thought_count,
            }),
        })
    }

    fn build_system_prompt(&self, query: &str, tool_lines: &str, react_loop: &ReactLoop) -> String {
        let mut prompt = String::from(
            "You are an assistant that solves tasks with a strict ReAct format.\n\
             Respond using exactly these markers, one per line:\n\
             Thought: your concrete reasoning (never empty)\n\
             Action: tool_name\n\
             Action Input: {\"param\": \"value\"}\n\
             Observation: (filled in by the system after the tool runs)\n\
             Final Answer: the answer once you are done\n\n\
             Either give a Final Answer or take an Action; after an Action,\n\
             wait for the Observation before continuing.\n",
        );

        if tool_lines.is_empty() {
            prompt.push_str("\nNo tools are available; answer directly.\n");
        } else {
            prompt.push_str("\nAvailable tools:\n");
            prompt.push_str(tool_lines);
            prompt.push('\n');
        }

        prompt.push_str(&format!("\nCurrent task: {}\n", query));

        let transcript = self.render_transcript(react_loop);
        if !transcript.is_empty() {
            prompt.push_str("\nProgress so far:\n");
            prompt.push_str(&transcript);
            prompt.push('\n');
        }

        prompt
    }

    /// Rebuild the running transcript from the loop record
    fn render_transcript(&self, react_loop: &ReactLoop) -> String {
        let mut lines = Vec::new();
        let steps = react_loop
            .thoughts
            .len()
            .max(react_loop.actions.len())
            .max(react_loop.observations.len());

        for i in 0..steps {
            if let Some(thought) = react_loop.thoughts.get(i) {
                lines.push(format!("Thought: {}", thought));
            }
            if let Some(action) = react_loop.actions.get(i) {
                lines.push(format!("Action: {}", action.tool));
                lines.push(format!("Action Input: {}", action.input));
            }
            if let Some(observation) = react_loop.observations.get(i) {
                lines.push(format!("Observation: {}", observation));
            }
        }

        lines.join("\n")
    }

    async fn call_llm(&self, system_prompt: &str, messages: &[Message]) -> Result<String> {
        let mut with_system = Vec::with_capacity(messages.len() + 1);
        with_system.push(Message::system(system_prompt));
        with_system.extend_from_slice(messages);

        let mut options = GenerateOptions::new();
        if let Some(temperature) = self.temperature {
            options = options.with_temperature(temperature);
        }

        let response = self
            .llm
            .generate(&with_system, &options)
            .await
            .map_err(|e| ReactError::Llm(e.to_string()))?;
        Ok(response.content)
    }

    /// Execute a tool call; failures become observations, never errors
    async fn execute_action(&self, action: &ActionCall) -> String {
        let tools = match &self.tools {
            Some(tools) => tools,
            None => return "no tool manager is available".to_string(),
        };

        match tools.execute(&action.tool, action.input.clone()).await {
            Ok(value) => match value {
                Value::String(text) => text,
                other => other.to_string(),
            },
            Err(e) => format!("tool {} failed: {}", action.tool, e),
        }
    }

    /// Parse a raw response without running the loop (used by tests and the
    /// streaming variant)
    pub fn parse_response(&self, response: &str) -> ParsedResponse {
        self.parser.parse(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgraph_core::{GraphError, InterruptPredicate, ToolInfo, TokenStream};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Model that replays a fixed script of responses
    pub(crate) struct ScriptedLlm {
        responses: Vec<String>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        pub(crate) fn new<I, S>(responses: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                responses: responses.into_iter().map(Into::into).collect(),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn generate(
            &self,
            _messages: &[Message],
            _options: &GenerateOptions,
        ) -> agentgraph_core::Result<Message> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            let content = self
                .responses
                .get(index)
                .cloned()
                .unwrap_or_else(|| "Final Answer: out of script".to_string());
            Ok(Message::assistant(content))
        }

        async fn stream_generate(
            &self,
            _messages: &[Message],
            _options: &GenerateOptions,
            _interrupt: Option<InterruptPredicate>,
        ) -> agentgraph_core::Result<TokenStream> {
            Err(GraphError::Llm("not streamed in tests".to_string()))
        }
    }

    /// Single echo-style adder tool
    struct AdderTools;

    #[async_trait]
    impl ToolRegistry for AdderTools {
        async fn list_tools(&self) -> Vec<ToolInfo> {
            vec![ToolInfo::new(
                "math_add",
                "Add two numbers",
                serde_json::json!({"type": "object", "required": ["a", "b"]}),
            )]
        }

        async fn execute(&self, name: &str, arguments: Value) -> agentgraph_core::Result<Value> {
            assert_eq!(name, "math_add");
            let a = arguments["a"].as_i64().unwrap_or(0);
            let b = arguments["b"].as_i64().unwrap_or(0);
            Ok(serde_json::json!(a + b))
        }
    }

    /// Tool registry whose single tool always fails
    struct BrokenTools;

    #[async_trait]
    impl ToolRegistry for BrokenTools {
        async fn list_tools(&self) -> Vec<ToolInfo> {
            vec![ToolInfo::new("db_query", "Query the DB", serde_json::json!({}))]
        }

        async fn execute(&self, _name: &str, _arguments: Value) -> agentgraph_core::Result<Value> {
            Err(GraphError::Execution("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_trivial_run_no_tools() {
        let llm = Arc::new(ScriptedLlm::new([
            "Thought: The user greeted me.\nFinal Answer: Hello! How can I help?",
        ]));
        let agent = create_react_agent(llm.clone()).build();

        let result = agent.run("hello").await.unwrap();

        assert_eq!(result.result, "Hello! How can I help?");
        assert!(result.success);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.tool_calls, 0);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_single_tool_hop() {
        let llm = Arc::new(ScriptedLlm::new([
            "Thought: need the sum.\nAction: math_add\nAction Input: {\"a\":2,\"b\":3}",
            "Final Answer: 5",
        ]));
        let agent = create_react_agent(llm.clone())
            .with_tools(Arc::new(AdderTools))
            .build();

        let result = agent.run("add 2 and 3").await.unwrap();

        assert_eq!(result.result, "5");
        assert!(result.success);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.tool_calls, 1);
        assert_eq!(result.metadata["observations"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_thought_recovery_trips_at_three() {
        let llm = Arc::new(ScriptedLlm::new([
            "Thought:\nAction:\nObservation:",
            "Thought:\nAction:\nObservation:",
            "Thought:\nAction:\nObservation:",
        ]));
        let agent = create_react_agent(llm.clone()).build();

        let result = agent.run("puzzle").await.unwrap();

        assert!(result.success);
        assert!(result.result.contains("抱歉"));
        assert!(result.result.contains("puzzle"));
        assert_eq!(llm.call_count(), 3);
        assert_eq!(result.metadata["empty_thought_count"], 3);
    }

    #[tokio::test]
    async fn test_empty_thought_counter_resets() {
        let llm = Arc::new(ScriptedLlm::new([
            "Thought:\nAction:\nObservation:",
            "Thought: recovered, answering now.\nFinal Answer: done",
        ]));
        let agent = create_react_agent(llm).build();

        let result = agent.run("q").await.unwrap();
        assert_eq!(result.result, "done");
        assert_eq!(result.metadata["empty_thought_count"], 0);
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_observation() {
        let llm = Arc::new(ScriptedLlm::new([
            "Thought: query the db.\nAction: db_query\nAction Input: {\"sql\": \"select 1\"}",
            "Final Answer: the database is unavailable",
        ]));
        let agent = create_react_agent(llm)
            .with_tools(Arc::new(BrokenTools))
            .build();

        let result = agent.run("check db").await.unwrap();

        assert!(result.success);
        let observations = result.metadata["observations"].as_array().unwrap();
        let observation = observations[0].as_str().unwrap();
        assert!(observation.starts_with("tool db_query failed:"));
        assert!(observation.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_max_iterations_triggers_summary_turn() {
        let llm = Arc::new(ScriptedLlm::new([
            "Thought: still thinking step one.",
            "Thought: still thinking step two.",
            "a concluding summary",
        ]));
        let agent = create_react_agent(llm.clone()).with_max_iterations(2).build();

        let result = agent.run("hard problem").await.unwrap();

        assert!(result.success);
        assert_eq!(result.result, "a concluding summary");
        // max_iterations + 1 calls: two loop turns plus the summary
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_no_thought_at_all_is_a_failed_run() {
        // Content-free responses that still are not "empty thought" markers
        let llm = Arc::new(ScriptedLlm::new(["", ""]));
        let agent = create_react_agent(llm).with_max_iterations(2).build();

        let result = agent.run("q").await.unwrap();

        assert!(!result.success);
        assert_eq!(result.result, NO_THOUGHT_ANSWER);
    }
}
