//! Vidpipe - Video Ingest Pipeline
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (tasks, platforms, naming, progress, av)
//! - ports/: Trait definitions
//! - adapters/: Concrete implementations (Redis, in-memory, fetcher, HTTP API)
//! - application/: Generic services (task operations, pipeline worker)
//! - config: Environment configuration
//! - error: Error taxonomy

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

// Re-exports for convenience
pub use application::tasks::TaskService;
pub use application::worker::{WorkerConfig, WorkerService};
pub use config::{Config, StoreKind};
pub use domain::av;
