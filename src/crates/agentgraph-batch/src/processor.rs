//! Batch execution engine
//!
//! [`BatchProcessor::run`] yields a typed event stream. Parallel mode
//! partitions rows into consecutive batches of `batch_size` and runs up to
//! `concurrent_tasks` row tasks at once inside each batch; the next batch
//! does not start until the previous one finished, so batches complete in
//! order while rows within a batch are unordered. Sequential mode emits
//! task events in strict row-index order. A row failure never cancels its
//! siblings.
//!
//! Cancellation stops the scheduling of further tasks, drains what is in
//! flight, and closes the stream with a `final_summary` whose status is
//! `cancelled`.

use crate::config::{BatchConfig, ProcessingMode};
use crate::executor::TaskExecutor;
use crate::instruction::{render_template, InstructionGenerator};
use crate::progress::{BatchEvent, BatchProgress, BatchStatus};
use crate::table::{load_csv, Row};
use agentgraph_core::LanguageModel;
use futures::Stream;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of one spawned row task
struct RowOutcome {
    row_index: usize,
    result: std::result::Result<String, String>,
    elapsed: Duration,
}

/// Drives batch runs over a CSV input
pub struct BatchProcessor {
    config: BatchConfig,
    llm: Arc<dyn LanguageModel>,
    executor: Arc<dyn TaskExecutor>,
    cancel: CancellationToken,
}

impl BatchProcessor {
    pub fn new(
        config: BatchConfig,
        llm: Arc<dyn LanguageModel>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            config,
            llm,
            executor,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts scheduling when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute the batch, yielding progress events until the final summary
    pub fn run(&self, user_message: impl Into<String>) -> impl Stream<Item = BatchEvent> + Send {
        let config = self.config.clone();
        let llm = self.llm.clone();
        let executor = self.executor.clone();
        let cancel = self.cancel.clone();
        let user_message = user_message.into();

        async_stream::stream! {
            if let Err(e) = config.validate() {
                yield BatchEvent::Error { message: e.to_string() };
                return;
            }

            let (rows, structure) = match load_csv(&config.csv_path) {
                Ok(loaded) => loaded,
                Err(e) => {
                    yield BatchEvent::Error { message: e.to_string() };
                    return;
                }
            };

            let total = rows.len();
            let total_batches = match config.mode {
                ProcessingMode::Parallel => total.div_ceil(config.batch_size),
                ProcessingMode::Sequential => 1,
            };
            let mut progress = BatchProgress::new(total, total_batches);
            yield BatchEvent::Progress { progress: progress.clone() };

            let generator = InstructionGenerator::new(llm.clone());
            let (instruction, warnings) = generator.generate(&user_message, &structure).await;
            for warning in &warnings {
                warn!(warning, "Instruction placeholder warning");
            }
            info!(task_type = %instruction.task_type, rows = total, "Batch instruction ready");
            yield BatchEvent::InstructionGenerated {
                instruction: instruction.clone(),
                warnings,
            };

            let run_started = Instant::now();
            let template = instruction.per_row_template.clone();
            let mut cancelled = false;

            match config.mode {
                ProcessingMode::Parallel => {
                    for (batch_number, batch) in rows.chunks(config.batch_size).enumerate() {
                        if cancel.is_cancelled() {
                            cancelled = true;
                            break;
                        }

                        progress.current_batch = batch_number + 1;
                        yield BatchEvent::BatchStart {
                            batch_index: batch_number + 1,
                            total_batches,
                            progress: progress.clone(),
                        };

                        let semaphore = Arc::new(Semaphore::new(config.concurrent_tasks));
                        let mut join_set: JoinSet<RowOutcome> = JoinSet::new();

                        for row in batch {
                            if cancel.is_cancelled() {
                                cancelled = true;
                                break;
                            }
                            let prompt = render_row_prompt(&template, row, &config);
                            let row_index = row_index_of(row);
                            let executor = executor.clone();
                            let semaphore = semaphore.clone();
                            let row = row.clone();

                            join_set.spawn(async move {
                                let _permit = semaphore.acquire_owned().await;
                                let started = Instant::now();
                                let result = executor.execute(&prompt, &row, row_index).await;
                                RowOutcome {
                                    row_index,
                                    result,
                                    elapsed: started.elapsed(),
                                }
                            });
                        }

                        // In-flight tasks always run to completion, even
                        // after a cancel or a sibling failure
                        while let Some(joined) = join_set.join_next().await {
                            let outcome = match joined {
                                Ok(outcome) => outcome,
                                Err(e) => {
                                    yield BatchEvent::Error {
                                        message: format!("row task panicked: {}", e),
                                    };
                                    continue;
                                }
                            };
                            match outcome.result {
                                Ok(result) => {
                                    progress.record_success(outcome.elapsed);
                                    yield BatchEvent::TaskCompleted {
                                        row_index: outcome.row_index,
                                        result,
                                        elapsed_secs: outcome.elapsed.as_secs_f64(),
                                        progress: progress.clone(),
                                    };
                                }
                                Err(error) => {
                                    progress.record_failure(outcome.elapsed);
                                    yield BatchEvent::TaskError {
                                        row_index: outcome.row_index,
                                        error,
                                        progress: progress.clone(),
                                    };
                                }
                            }
                        }

                        yield BatchEvent::BatchCompleted {
                            batch_index: batch_number + 1,
                            progress: progress.clone(),
                        };

                        if cancelled {
                            break;
                        }
                    }
                }
                ProcessingMode::Sequential => {
                    yield BatchEvent::SequentialStart { total };

                    for row in &rows {
                        if cancel.is_cancelled() {
                            cancelled = true;
                            break;
                        }

                        let row_index = row_index_of(row);
                        let prompt = render_row_prompt(&template, row, &config);
                        progress.current_task = prompt.clone();

                        yield BatchEvent::TaskStart {
                            row_index,
                            description: prompt.clone(),
                        };

                        let started = Instant::now();
                        match executor.execute(&prompt, row, row_index).await {
                            Ok(result) => {
                                progress.record_success(started.elapsed());
                                yield BatchEvent::TaskCompleted {
                                    row_index,
                                    result,
                                    elapsed_secs: started.elapsed().as_secs_f64(),
                                    progress: progress.clone(),
                                };
                            }
                            Err(error) => {
                                progress.record_failure(started.elapsed());
                                yield BatchEvent::TaskError {
                                    row_index,
                                    error,
                                    progress: progress.clone(),
                                };
                            }
                        }
                    }
                }
            }

            yield BatchEvent::FinalSummary {
                total,
                successful: progress.successful,
                failed: progress.failed,
                status: if cancelled {
                    BatchStatus::Cancelled
                } else {
                    BatchStatus::Completed
                },
                elapsed_secs: run_started.elapsed().as_secs_f64(),
            };
        }
    }
}

fn row_index_of(row: &Row) -> usize {
    row.get("_row_index")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize
}

/// Render the template against the row, honoring field selection
fn render_row_prompt(template: &str, row: &Row, config: &BatchConfig) -> String {
    match &config.field_selection {
        Some(fields) => {
            let mut filtered = Row::new();
            for (column, value) in row {
                if column == "_row_index" || fields.iter().any(|field| field == column) {
                    filtered.insert(column.clone(), value.clone());
                }
            }
            render_template(template, &filtered)
        }
        None => render_template(template, row),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::EchoTaskExecutor;
    use agentgraph_core::{
        GenerateOptions, GraphError, InterruptPredicate, Message, TokenStream,
    };
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Always returns the greeting instruction JSON
    struct GreeterLlm;

    #[async_trait]
    impl LanguageModel for GreeterLlm {
        async fn generate(
            &self,
            _messages: &[Message],
            _options: &GenerateOptions,
        ) -> agentgraph_core::Result<Message> {
            Ok(Message::assistant(
                r#"{"task_type":"greeting","batch_description":"greet each person","per_row_template":"Say hi to {name}","expected_output":"a greeting"}"#,
            ))
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

    fn csv_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    async fn collect(processor: &BatchProcessor, message: &str) -> Vec<BatchEvent> {
        processor.run(message).collect::<Vec<_>>().await
    }

    #[tokio::test]
    async fn test_sequential_event_order() {
        let file = csv_file("name\nA\nB\n");
        let config = BatchConfig::new(file.path()).with_mode(ProcessingMode::Sequential);
        let processor =
            BatchProcessor::new(config, Arc::new(GreeterLlm), Arc::new(EchoTaskExecutor));

        let events = collect(&processor, "greet each").await;

        let tags: Vec<&str> = events
            .iter()
            .map(|event| match event {
                BatchEvent::Progress { .. } => "progress",
                BatchEvent::InstructionGenerated { .. } => "instruction_generated",
                BatchEvent::SequentialStart { .. } => "sequential_start",
                BatchEvent::TaskStart { .. } => "task_start",
                BatchEvent::TaskCompleted { .. } => "task_completed",
                BatchEvent::TaskError { .. } => "task_error",
                BatchEvent::FinalSummary { .. } => "final_summary",
                _ => "other",
            })
            .collect();
        assert_eq!(
            tags,
            vec![
                "progress",
                "instruction_generated",
                "sequential_start",
                "task_start",
                "task_completed",
                "task_start",
                "task_completed",
                "final_summary",
            ]
        );

        // Completion events in strictly increasing row order with the
        // rendered prompt echoed back
        let completions: Vec<(usize, String)> = events
            .iter()
            .filter_map(|event| match event {
                BatchEvent::TaskCompleted { row_index, result, .. } => {
                    Some((*row_index, result.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            completions,
            vec![(1, "Say hi to A".to_string()), (2, "Say hi to B".to_string())]
        );

        match events.last().unwrap() {
            BatchEvent::FinalSummary {
                total,
                successful,
                failed,
                status,
                ..
            } => {
                assert_eq!(*total, 2);
                assert_eq!(*successful, 2);
                assert_eq!(*failed, 0);
                assert_eq!(*status, BatchStatus::Completed);
            }
            other => panic!("expected final summary, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_parallel_batches_complete_in_order() {
        let file = csv_file("name\nA\nB\nC\nD\nE\n");
        let config = BatchConfig::new(file.path())
            .with_batch_size(2)
            .with_concurrent_tasks(2);
        let processor =
            BatchProcessor::new(config, Arc::new(GreeterLlm), Arc::new(EchoTaskExecutor));

        let events = collect(&processor, "greet each").await;

        let batch_starts: Vec<usize> = events
            .iter()
            .filter_map(|event| match event {
                BatchEvent::BatchStart { batch_index, .. } => Some(*batch_index),
                _ => None,
            })
            .collect();
        assert_eq!(batch_starts, vec![1, 2, 3]);

        let completions = events
            .iter()
            .filter(|event| matches!(event, BatchEvent::TaskCompleted { .. }))
            .count();
        assert_eq!(completions, 5);

        // Every completion in batch 2 comes after batch 1 finished
        let mut batch_boundary_seen = 0;
        for event in &events {
            match event {
                BatchEvent::BatchCompleted { .. } => batch_boundary_seen += 1,
                BatchEvent::TaskCompleted { row_index, .. } => match batch_boundary_seen {
                    0 => assert!(*row_index <= 2),
                    1 => assert!(*row_index > 2 && *row_index <= 4),
                    _ => assert!(*row_index > 4),
                },
                _ => {}
            }
        }
    }

    /// Tracks the maximum number of concurrently running tasks
    struct ConcurrencyProbe {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TaskExecutor for ConcurrencyProbe {
        async fn execute(
            &self,
            prompt: &str,
            _row: &Row,
            _row_index: usize,
        ) -> std::result::Result<String, String> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(prompt.to_string())
        }
    }

    #[tokio::test]
    async fn test_parallel_concurrency_is_bounded() {
        let file = csv_file("name\nA\nB\nC\nD\nE\nF\n");
        let probe = Arc::new(ConcurrencyProbe {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let config = BatchConfig::new(file.path())
            .with_batch_size(6)
            .with_concurrent_tasks(2);
        let processor = BatchProcessor::new(config, Arc::new(GreeterLlm), probe.clone());

        let _ = collect(&processor, "go").await;
        assert!(probe.peak.load(Ordering::SeqCst) <= 2);
    }

    /// Fails on one specific row
    struct FailOnRow(usize);

    #[async_trait]
    impl TaskExecutor for FailOnRow {
        async fn execute(
            &self,
            prompt: &str,
            _row: &Row,
            row_index: usize,
        ) -> std::result::Result<String, String> {
            if row_index == self.0 {
                Err("simulated failure".to_string())
            } else {
                Ok(prompt.to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_row_failure_does_not_cancel_siblings() {
        let file = csv_file("name\nA\nB\nC\n");
        let config = BatchConfig::new(file.path()).with_batch_size(3);
        let processor =
            BatchProcessor::new(config, Arc::new(GreeterLlm), Arc::new(FailOnRow(2)));

        let events = collect(&processor, "go").await;

        let errors = events
            .iter()
            .filter(|event| matches!(event, BatchEvent::TaskError { .. }))
            .count();
        let completions = events
            .iter()
            .filter(|event| matches!(event, BatchEvent::TaskCompleted { .. }))
            .count();
        assert_eq!(errors, 1);
        assert_eq!(completions, 2);

        match events.last().unwrap() {
            BatchEvent::FinalSummary {
                successful, failed, ..
            } => {
                assert_eq!(*successful, 2);
                assert_eq!(*failed, 1);
            }
            other => panic!("expected final summary, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_yields_cancelled_summary() {
        let file = csv_file("name\nA\nB\nC\nD\n");
        let config = BatchConfig::new(file.path()).with_mode(ProcessingMode::Sequential);
        let processor =
            BatchProcessor::new(config, Arc::new(GreeterLlm), Arc::new(EchoTaskExecutor));

        // Cancel before the run starts scheduling tasks
        processor.cancellation_token().cancel();
        let events = collect(&processor, "go").await;

        match events.last().unwrap() {
            BatchEvent::FinalSummary { status, .. } => {
                assert_eq!(*status, BatchStatus::Cancelled);
            }
            other => panic!("expected final summary, got {:?}", other),
        }
        let completions = events
            .iter()
            .filter(|event| matches!(event, BatchEvent::TaskCompleted { .. }))
            .count();
        assert_eq!(completions, 0);
    }

    #[tokio::test]
    async fn test_missing_csv_yields_error_event() {
        let config = BatchConfig::new("/definitely/not/here.csv");
        let processor =
            BatchProcessor::new(config, Arc::new(GreeterLlm), Arc::new(EchoTaskExecutor));

        let events = collect(&processor, "go").await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], BatchEvent::Error { .. }));
    }
}
