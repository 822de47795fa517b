//! stepline - Synchronous step-sequencing execution engine
//!
//! Threads a mutable change set through an ordered list of steps, each
//! wrapping a pluggable constructor, with conditional guards, three-phase
//! (before/around/after) interception at step and execution granularity,
//! and typed, taxonomy-aware error recovery that can halt or continue the
//! fold.
//!
//! # Architecture
//!
//! Execution is fully synchronous and deterministic:
//! - before/after callbacks run in registration order and thread the
//!   change set from one to the next
//! - around callbacks nest outside-in, first-registered outermost, each
//!   deciding whether to call its continuation
//! - error callbacks are scanned first-fit in registration order, once
//!   inside the step fold (continue) and once at the boundary (recover)
//!
//! # Modules
//!
//! - `pipeline`: the orchestrator and its configuration surface
//! - `step`: one pipeline stage (guards, option mapping, telemetry)
//! - `constructor` / `registry`: named units of work and their tables
//! - `callbacks`: ordered hook lists and around chains
//! - `error` / `taxonomy` / `error_callback`: error kinds, their declared
//!   hierarchy, and recovery rules
//! - `logger`: the `record(step)` collaborator and the default status log
//!
//! # Usage
//!
//! ```
//! use stepline::Pipeline;
//!
//! let mut pipeline: Pipeline<String> = Pipeline::configure(|p| {
//!     p.step_fn(|_, word: &String| Ok(Some(word.to_uppercase())))
//!         .register()?;
//!     p.step_fn(|_, word: &String| Ok(Some(word.chars().rev().collect())))
//!         .label("reverse")
//!         .register()?;
//!     Ok(())
//! })
//! .unwrap();
//!
//! let result = pipeline.execute("hanna".to_string()).unwrap();
//! assert_eq!(result, "ANNAH");
//! ```

pub mod callbacks;
pub mod constructor;
pub mod error;
pub mod error_callback;
pub mod logger;
pub mod pipeline;
pub mod registry;
pub mod step;
pub mod taxonomy;

// Re-export main types at crate root for convenience
pub use callbacks::{Callbacks, Continuation, Phase, Scope};
pub use constructor::{Constructor, ConstructorOptions};
pub use error::{ConfigError, ErrorKind, FailureContext, PipelineError, StepError};
pub use error_callback::ErrorCallback;
pub use logger::{StatusLog, StepLogger};
pub use pipeline::{Pipeline, StepBuilder};
pub use registry::ConstructorRegistry;
pub use step::{Step, StepArgument, StepKind, StepReport, StepStatus};
pub use taxonomy::ErrorTaxonomy;
