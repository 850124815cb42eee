//! # agentgraph-prebuilt
//!
//! Ready-made agent patterns over the agentgraph core: a [`ReactAgent`]
//! driving the Thought -> Action -> Observation loop against any
//! [`LanguageModel`](agentgraph_core::LanguageModel), the marker-grammar
//! [`ReactParser`], and a [`StreamingReactAgent`] that interrupts the token
//! stream to execute tool calls in place.

pub mod error;
pub mod parser;
pub mod react;
pub mod streaming;

pub use error::{ReactError, Result};
pub use parser::{ActionCall, ParsedResponse, ReactParser};
pub use react::{create_react_agent, ReactAgent, ReactAgentConfig, ReactLoop, TaskResult, NO_THOUGHT_ANSWER};
pub use streaming::{
    should_interrupt_for_observation, ObservationAnalysis, ReactStreamEvent, ResultShape,
    SizeBucket, StreamingReactAgent, MAX_INTERRUPT_DEPTH,
};
