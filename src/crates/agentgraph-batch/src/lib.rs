//! # agentgraph-batch
//!
//! Batch processor for agentgraph: ingests a CSV (with encoding
//! autodetection), asks the LLM for a per-row task template, and executes
//! the resulting row tasks either in bounded-parallel batches or strictly
//! sequentially, streaming typed progress events throughout.

pub mod config;
pub mod error;
pub mod executor;
pub mod instruction;
pub mod processor;
pub mod progress;
pub mod table;

pub use config::{BatchConfig, ProcessingMode};
pub use error::{BatchError, Result};
pub use executor::{EchoTaskExecutor, ReactTaskExecutor, TaskExecutor};
pub use instruction::{render_template, BatchInstruction, InstructionGenerator};
pub use processor::BatchProcessor;
pub use progress::{BatchEvent, BatchProgress, BatchStatus};
pub use table::{load_csv, ColumnType, CsvStructure, Row};
