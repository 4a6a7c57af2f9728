//! # qg-core: the "Rules" of QUERYGATE
//!
//! Everything that decides what happens to a query without touching the
//! outside world: the request/response wire types, the SQL subset parser,
//! the [`signals::SignalExtractor`] seam, the [`policy::AdmissionPolicy`]
//! and the job state machine.
//!
//! Nothing in this crate performs I/O or holds shared state. The hub wires
//! these pieces to the credential store, the cache, the executor and the
//! job ledger.

pub mod error;
pub mod job;
pub mod policy;
pub mod request;
pub mod response;
pub mod signals;
pub mod sql;

pub use error::{DenyReason, ErrorKind, QueryError};
pub use job::{Job, JobId, JobState};
pub use policy::{Admission, AdmissionPolicy, ScheduleReason};
pub use request::{EnterpriseContext, ExecutionPreferences, QueryRequest, Row, UserContext};
pub use response::{JobStatusResponse, QueryResponse, ResponseStatus, Route};
pub use signals::{CostModel, HeuristicExtractor, OperationKind, QuerySignals, SignalExtractor};
