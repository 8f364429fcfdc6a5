//! Data model shared by the pipeline stages
//!
//! A listing page yields [`CandidateRef`]s; a detail page yields [`ProjectFields`]
//! which the orchestrator seals into an immutable [`Record`]. A [`Job`] is one
//! orchestrator run over a [`JobTemplate`].

mod job;
mod record;
mod status;

pub use job::{Job, JobStats, JobTemplate};
pub use record::{
    content_hash, Author, CandidateRef, Content, Extensions, Funding, ProjectFields, Record,
    MAX_EXTENSIONS,
};
pub use status::{JobStatus, ProjectStatus};
