//! # agentgraph-cli
//!
//! Development CLI for agentgraph: inspect configured MCP tool servers and
//! dry-run CSV batches with the echo executor. Exits 0 on clean shutdown
//! and non-zero on any fatal error.

use agentgraph_batch::{
    BatchConfig, BatchEvent, BatchProcessor, EchoTaskExecutor, ProcessingMode,
};
use agentgraph_core::{
    GenerateOptions, GraphError, InterruptPredicate, LanguageModel, Message, TokenStream,
};
use agentgraph_mcp::McpToolManager;
use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "agentgraph")]
#[command(about = "agentgraph CLI - inspect tool servers and dry-run batches", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the configured MCP servers and list their tools
    Tools {
        /// Server ids to enable (defaults to csv)
        #[arg(short, long)]
        enable: Vec<String>,
    },

    /// Dry-run a CSV batch with the echo executor
    Batch {
        /// Path to the CSV input
        csv: PathBuf,

        /// Instruction for the batch
        #[arg(short, long, default_value = "Process each data row")]
        message: String,

        /// Run rows sequentially instead of in parallel batches
        #[arg(long)]
        sequential: bool,

        /// Rows per batch in parallel mode
        #[arg(long, default_value_t = 20)]
        batch_size: usize,

        /// Concurrent row tasks within a batch
        #[arg(long, default_value_t = 5)]
        concurrent: usize,
    },
}

/// Offline stand-in for the LLM: instruction generation falls back to the
/// deterministic first-column template, which is what a dry run wants.
struct OfflineModel;

#[async_trait]
impl LanguageModel for OfflineModel {
    async fn generate(
        &self,
        _messages: &[Message],
        _options: &GenerateOptions,
    ) -> agentgraph_core::Result<Message> {
        Ok(Message::assistant("offline"))
    }

    async fn stream_generate(
        &self,
        _messages: &[Message],
        _options: &GenerateOptions,
        _interrupt: Option<InterruptPredicate>,
    ) -> agentgraph_core::Result<TokenStream> {
        Err(GraphError::Llm("offline model does not stream".to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Tools { enable } => run_tools(enable).await,
        Commands::Batch {
            csv,
            message,
            sequential,
            batch_size,
            concurrent,
        } => run_batch(csv, message, sequential, batch_size, concurrent).await,
    }
}

async fn run_tools(enable: Vec<String>) -> anyhow::Result<()> {
    let manager = McpToolManager::new();
    if !enable.is_empty() {
        manager.set_enabled_servers(enable).await;
    }

    let results = manager.start_all().await;
    for (server, started) in &results {
        println!(
            "{}: {}",
            server,
            if *started { "running" } else { "failed to start" }
        );
    }

    let tools = manager.list_tools().await;
    if tools.is_empty() {
        println!("No tools available from enabled servers.");
    } else {
        println!("\nAvailable tools:");
        for tool in &tools {
            println!("  - {}", tool.prompt_line());
        }
    }

    manager.stop_all().await;
    Ok(())
}

async fn run_batch(
    csv: PathBuf,
    message: String,
    sequential: bool,
    batch_size: usize,
    concurrent: usize,
) -> anyhow::Result<()> {
    let mode = if sequential {
        ProcessingMode::Sequential
    } else {
        ProcessingMode::Parallel
    };
    let config = BatchConfig::new(csv)
        .with_mode(mode)
        .with_batch_size(batch_size)
        .with_concurrent_tasks(concurrent);
    config.validate().context("invalid batch configuration")?;

    let processor = BatchProcessor::new(config, Arc::new(OfflineModel), Arc::new(EchoTaskExecutor));
    let mut events = Box::pin(processor.run(message));

    let mut failed = 0usize;
    while let Some(event) = events.next().await {
        match &event {
            BatchEvent::InstructionGenerated { instruction, .. } => {
                println!("instruction: {}", instruction.per_row_template);
            }
            BatchEvent::TaskCompleted { row_index, result, .. } => {
                println!("row {}: {}", row_index, result);
            }
            BatchEvent::TaskError { row_index, error, .. } => {
                println!("row {} FAILED: {}", row_index, error);
            }
            BatchEvent::FinalSummary {
                total,
                successful,
                failed: failures,
                status,
                ..
            } => {
                failed = *failures;
                println!(
                    "done: {}/{} succeeded ({:?})",
                    successful, total, status
                );
            }
            BatchEvent::Error { message } => {
                anyhow::bail!("batch failed: {}", message);
            }
            _ => {}
        }
    }

    if failed > 0 {
        println!("note: {} row(s) failed; see output above", failed);
    }
    Ok(())
}
