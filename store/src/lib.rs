//! Partitioned dataset client.
//!
//! Records land under
//! `datasets/<dataset>/partitions/source=<s>/category=<c>/day=<d>/run_id=<r>/event_type=<t>/`
//! as immutable newline-delimited JSON part objects, one part per batch
//! write. Two backends share the one write path: the local filesystem and
//! any S3-compatible object store.
//!
//! The client enforces the chunks-before-commit invariant: an artifact
//! commit event is refused unless a chunk write for the same `artifact_id`
//! already succeeded on this client.

mod backend;
mod client;
mod error;
mod partition;
mod record;

pub use backend::{build_operator, BackendConfig, BackendKind};
pub use client::StoreClient;
pub use error::StoreError;
pub use partition::PartitionSpec;
pub use record::MetricsRecord;
