//! Mender - error classification and automated recovery
//!
//! Mender sits between a service and its failures. Every error handed to
//! [`RecoveryEngine::handle_error`] is normalized into a signature, classified
//! by category and severity, folded into a recurring pattern, and then run
//! through the recovery action the pattern was assigned: retry with backoff,
//! fallback, circuit breaking, escalation, restart, ignore, or manual
//! intervention.
//!
//! ```no_run
//! use mender::{ErrorContext, ErrorReport, RecoveryEngine};
//!
//! # async fn run() {
//! let engine = RecoveryEngine::new();
//! let outcome = engine
//!     .handle_error(
//!         ErrorReport::new("ValueError", "Validation error: field required"),
//!         ErrorContext::new(),
//!     )
//!     .await;
//! assert!(outcome.success);
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod notification;
pub mod recovery;
pub mod registry;

pub use config::{ConfigLoadError, EngineConfig};
pub use engine::{ErrorReport, HandlingState, Outcome, RecoveryEngine, RecoveryEngineBuilder};
pub use error::{Category, Classification, Severity};
pub use metrics::EngineStatistics;
pub use recovery::{ActionResult, RecoveryAction, RecoveryError, RecoveryHandler, RecoveryRule};
pub use registry::{ErrorContext, ErrorInstance, ErrorPattern};
