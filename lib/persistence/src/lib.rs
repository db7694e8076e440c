//! Persistence layer for the operion platform.
//!
//! The pipeline consumes storage through the repository traits in
//! [`traits`]; storage itself is pluggable. Two backends ship in-tree:
//!
//! - [`FileStore`]: JSON documents on the local filesystem, selected by
//!   `file://` database URLs. Used for development and tests.
//! - [`PgStore`]: Postgres via sqlx. Maintains a denormalized
//!   `trigger_nodes` table so the activation-critical trigger match is an
//!   indexed lookup rather than a scan.

pub mod error;
pub mod file;
pub mod postgres;
pub mod traits;

pub use error::{RepositoryError, WorkflowGroupError};
pub use file::FileStore;
pub use postgres::PgStore;
pub use traits::{
    ConnectionRepository, ExecutionContextRepository, InputCoordinationRepository,
    InputCoordinationState, ListWorkflowsOptions, NodeRepository, SortField, TriggerNodeMatch,
    WorkflowRepository,
};
