//! # Flowpilot Engine
//!
//! The Flowpilot Engine turns templated test intentions into executable,
//! multi-step browser-automation plans and drives them with live progress
//! reporting.
//!
//! ## Key Features
//!
//! - **Definition Parsing**: Semi-structured test-design text, JSON, and
//!   YAML templates all parse into one canonical `WorkflowDefinition`
//! - **Dependency Resolution**: Ordered, de-duplicated prerequisite chains,
//!   with question-driven optional dependencies
//! - **Template Merging**: Typed field validation and `{{field_id}}`
//!   placeholder substitution into a flat execution plan
//! - **Orchestration**: One async task per execution with pause, resume,
//!   stop, and progress events
//!
//! ## Usage
//!
//! ```rust
//! use flowpilot_engine::{merge, resolve, Registry, parse_definition_str};
//!
//! let mut registry = Registry::new();
//! registry.insert(parse_definition_str(
//!     r#"{"workflow_id": "login_flow", "steps": [{"step_id": 1, "action": "navigate", "description": "open the login page"}]}"#,
//!     "login_flow",
//! )?);
//!
//! let chain = resolve(&registry, "login_flow", &serde_json::Map::new())?;
//! let plan = merge(&registry, &chain, &serde_json::Map::new())?;
//! assert_eq!(plan.steps.len(), 1);
//! # Ok::<(), flowpilot_engine::EngineError>(())
//! ```
//!
//! ## Architecture
//!
//! - **`parser`**: text/JSON/YAML definition parsing and prose classification
//! - **`registry`**: in-memory definition store with search and listing
//! - **`resolver`**: prerequisite chain resolution with cycle detection
//! - **`merge`**: validation, substitution, and plan assembly
//! - **`executor`**: the `StepExecutor` seam and the orchestrator

pub mod error;
pub mod executor;
pub mod merge;
pub mod parser;
pub mod registry;
pub mod resolver;

pub use error::EngineError;
pub use executor::{ChannelSink, EventSink, NoopExecutor, NullSink, Orchestrator, StepContext, StepExecutor, StepOutcome};
pub use merge::{merge, step_timeout};
pub use parser::{parse_definition_file, parse_definition_str, parse_json, parse_text, parse_yaml};
pub use registry::Registry;
pub use resolver::resolve;
