//! Progress tracking and the typed batch event stream

use crate::instruction::BatchInstruction;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Live snapshot of a batch run.
///
/// Invariant: `completed == successful + failed` and never exceeds `total`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub successful: usize,
    pub failed: usize,
    pub current_batch: usize,
    pub total_batches: usize,
    pub start_time: DateTime<Utc>,
    /// Running mean over completed tasks, in seconds
    pub avg_task_time: f64,
    pub current_task: String,
}

impl BatchProgress {
    pub fn new(total: usize, total_batches: usize) -> Self {
        Self {
            total,
            completed: 0,
            successful: 0,
            failed: 0,
            current_batch: 0,
            total_batches,
            start_time: Utc::now(),
            avg_task_time: 0.0,
            current_task: String::new(),
        }
    }

    pub fn record_success(&mut self, elapsed: Duration) {
        self.successful += 1;
        self.record_completion(elapsed);
    }

    pub fn record_failure(&mut self, elapsed: Duration) {
        self.failed += 1;
        self.record_completion(elapsed);
    }

    fn record_completion(&mut self, elapsed: Duration) {
        self.completed += 1;
        let n = self.completed as f64;
        self.avg_task_time += (elapsed.as_secs_f64() - self.avg_task_time) / n;
    }

    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }
}

/// Terminal status carried by the final summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    Cancelled,
}

/// Events yielded by the batch processor's stream
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Progress {
        progress: BatchProgress,
    },
    InstructionGenerated {
        instruction: BatchInstruction,
        warnings: Vec<String>,
    },
    BatchStart {
        batch_index: usize,
        total_batches: usize,
        progress: BatchProgress,
    },
    BatchCompleted {
        batch_index: usize,
        progress: BatchProgress,
    },
    SequentialStart {
        total: usize,
    },
    TaskStart {
        row_index: usize,
        description: String,
    },
    TaskCompleted {
        row_index: usize,
        result: String,
        elapsed_secs: f64,
        progress: BatchProgress,
    },
    TaskError {
        row_index: usize,
        error: String,
        progress: BatchProgress,
    },
    FinalSummary {
        total: usize,
        successful: usize,
        failed: usize,
        status: BatchStatus,
        elapsed_secs: f64,
    },
    Error {
        message: String,
    },
}
