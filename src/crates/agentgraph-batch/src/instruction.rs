//! LLM-driven batch instruction generation
//!
//! Given the user's request and the CSV structure summary, asks the model
//! for a JSON object describing the batch: task type, description, a
//! per-row template with `{column}` placeholders, and the expected output
//! shape. The response may arrive inside a fenced code block. On parse
//! failure a generic template referencing the first column is synthesised
//! instead of failing the run. Placeholders that do not match any CSV
//! column produce warnings.

use crate::table::{CsvStructure, Row};
use agentgraph_core::{GenerateOptions, LanguageModel, Message};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// The parameterisation of one batch run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchInstruction {
    pub task_type: String,
    pub description: String,
    pub per_row_template: String,
    pub total_rows: usize,
    pub expected_output: String,
}

/// Generates batch instructions through the LLM, with a deterministic
/// fallback
pub struct InstructionGenerator {
    llm: Arc<dyn LanguageModel>,
}

impl InstructionGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Ask the model for an instruction; fall back to a generic template on
    /// any parse problem. Returns the instruction plus placeholder warnings.
    pub async fn generate(
        &self,
        user_message: &str,
        structure: &CsvStructure,
    ) -> (BatchInstruction, Vec<String>) {
        let prompt = self.build_prompt(user_message, structure);
        let messages = [Message::user(prompt)];

        let instruction = match self.llm.generate(&messages, &GenerateOptions::new()).await {
            Ok(response) => match parse_instruction(&response.content, structure) {
                Some(instruction) => instruction,
                None => {
                    warn!("Instruction response unparsable; using fallback template");
                    fallback_instruction(user_message, structure)
                }
            },
            Err(e) => {
                warn!(error = %e, "Instruction generation call failed; using fallback template");
                fallback_instruction(user_message, structure)
            }
        };

        let warnings = validate_placeholders(&instruction.per_row_template, structure);
        (instruction, warnings)
    }

    fn build_prompt(&self, user_message: &str, structure: &CsvStructure) -> String {
        format!(
            "You are planning a batch job over tabular data.\n\n\
             User request: {}\n\n\
             Data structure:\n{}\n\n\
             Reply with a single JSON object:\n\
             {{\n\
             \x20 \"task_type\": \"short machine tag, e.g. schedule_generation\",\n\
             \x20 \"batch_description\": \"one sentence describing the batch\",\n\
             \x20 \"per_row_template\": \"instruction for one row, with {{column}} placeholders\",\n\
             \x20 \"expected_output\": \"what each row task should produce\"\n\
             }}\n\n\
             Every placeholder in per_row_template must exactly match a column name.",
            user_message,
            structure.describe()
        )
    }
}

/// Parse the model's reply, tolerating fenced code blocks and surrounding
/// prose
fn parse_instruction(response: &str, structure: &CsvStructure) -> Option<BatchInstruction> {
    let json_text = extract_json(response)?;
    let value: Value = serde_json::from_str(json_text).ok()?;
    let object = value.as_object()?;

    let template = object.get("per_row_template")?.as_str()?.to_string();
    if template.trim().is_empty() {
        return None;
    }

    Some(BatchInstruction {
        task_type: object
            .get("task_type")
            .and_then(Value::as_str)
            .unwrap_or("general_processing")
            .to_string(),
        description: object
            .get("batch_description")
            .and_then(Value::as_str)
            .unwrap_or("batch processing")
            .to_string(),
        per_row_template: template,
        total_rows: structure.row_count,
        expected_output: object
            .get("expected_output")
            .and_then(Value::as_str)
            .unwrap_or("processed result")
            .to_string(),
    })
}

/// Generic instruction referencing the first column
fn fallback_instruction(user_message: &str, structure: &CsvStructure) -> BatchInstruction {
    let first_column = structure
        .columns
        .first()
        .cloned()
        .unwrap_or_else(|| "_row_index".to_string());

    BatchInstruction {
        task_type: "general_processing".to_string(),
        description: format!("Batch processing for: {}", user_message),
        per_row_template: format!("{} (data row: {{{}}})", user_message, first_column),
        total_rows: structure.row_count,
        expected_output: "processed result".to_string(),
    }
}

fn extract_json(text: &str) -> Option<&str> {
    for fence in ["```json", "```JSON"] {
        if let Some(start) = text.find(fence) {
            let body = &text[start + fence.len()..];
            if let Some(end) = body.find("```") {
                return Some(body[..end].trim());
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].trim())
}

/// Warn for every `{placeholder}` that is not a CSV column
pub fn validate_placeholders(template: &str, structure: &CsvStructure) -> Vec<String> {
    let pattern = Regex::new(r"\{([^{}]+)\}").expect("static regex");
    let mut warnings = Vec::new();

    for capture in pattern.captures_iter(template) {
        let name = capture[1].trim();
        if name != "_row_index" && !structure.columns.iter().any(|column| column == name) {
            warnings.push(format!("placeholder '{{{}}}' matches no CSV column", name));
        }
    }
    warnings
}

/// Render a per-row template by substituting `{column}` placeholders with
/// the row's values. Unknown placeholders are left in place.
pub fn render_template(template: &str, row: &Row) -> String {
    let mut rendered = template.to_string();
    for (column, value) in row {
        let placeholder = format!("{{{}}}", column);
        if rendered.contains(&placeholder) {
            let text = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &text);
        }
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgraph_core::{GraphError, InterruptPredicate, TokenStream};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

    fn structure() -> CsvStructure {
        CsvStructure {
            columns: vec!["name".to_string(), "age".to_string()],
            column_types: HashMap::new(),
            sample: vec![],
            row_count: 2,
            encoding: "utf-8".to_string(),
        }
    }

    struct FixedLlm(String);

    #[async_trait]
    impl LanguageModel for FixedLlm {
        async fn generate(
            &self,
            _messages: &[Message],
            _options: &GenerateOptions,
        ) -> agentgraph_core::Result<Message> {
            Ok(Message::assistant(self.0.clone()))
        }

        async fn stream_generate(
            &self,
            _messages: &[Message],
            _options: &GenerateOptions,
            _interrupt: Option<InterruptPredicate>,
        ) -> agentgraph_core::Result<TokenStream> {
            Err(GraphError::Llm("unused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_generate_parses_plain_json() {
        let llm = Arc::new(FixedLlm(
            r#"{"task_type":"greeting","batch_description":"greet everyone","per_row_template":"Say hi to {name}","expected_output":"a greeting"}"#.to_string(),
        ));
        let generator = InstructionGenerator::new(llm);

        let (instruction, warnings) = generator.generate("greet each", &structure()).await;
        assert_eq!(instruction.task_type, "greeting");
        assert_eq!(instruction.per_row_template, "Say hi to {name}");
        assert_eq!(instruction.total_rows, 2);
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_generate_tolerates_fenced_block() {
        let llm = Arc::new(FixedLlm(
            "Here you go:\n```json\n{\"per_row_template\": \"Process {name}\"}\n```\nDone."
                .to_string(),
        ));
        let generator = InstructionGenerator::new(llm);

        let (instruction, _) = generator.generate("go", &structure()).await;
        assert_eq!(instruction.per_row_template, "Process {name}");
        assert_eq!(instruction.task_type, "general_processing");
    }

    #[tokio::test]
    async fn test_unparsable_reply_falls_back_to_first_column() {
        let llm = Arc::new(FixedLlm("I cannot produce JSON today.".to_string()));
        let generator = InstructionGenerator::new(llm);

        let (instruction, _) = generator.generate("summarise", &structure()).await;
        assert!(instruction.per_row_template.contains("{name}"));
        assert_eq!(instruction.task_type, "general_processing");
    }

    #[tokio::test]
    async fn test_unknown_placeholder_warns() {
        let llm = Arc::new(FixedLlm(
            r#"{"per_row_template": "Use {name} and {missing_column}"}"#.to_string(),
        ));
        let generator = InstructionGenerator::new(llm);

        let (_, warnings) = generator.generate("go", &structure()).await;
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("missing_column"));
    }

    #[test]
    fn test_render_template() {
        let mut row = Row::new();
        row.insert("name".to_string(), json!("A"));
        row.insert("_row_index".to_string(), json!(1));

        assert_eq!(render_template("Say hi to {name}", &row), "Say hi to A");
        assert_eq!(render_template("row {_row_index}", &row), "row 1");
        assert_eq!(render_template("keep {unknown}", &row), "keep {unknown}");
    }
}
