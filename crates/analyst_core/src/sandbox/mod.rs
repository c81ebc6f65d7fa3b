//! The governed execution core behind a deliberately narrow capability
//! interface: `check` (static policy), `validate` (schema), `execute`
//! (restricted interpretation). Callers compose the three; swapping the
//! enforcement strategy (say, a real out-of-process sandbox) touches nothing
//! outside this module.

pub mod interp;
pub mod schema;
pub mod value;

pub use crate::lang::policy::{check, PolicyViolation};
pub use interp::{execute, ExecutionFailure, ExecutionOutput};
pub use schema::{extract_column_refs, validate, UnknownColumnError};
pub use value::{GroupBy, GroupedSeries, Namespace, Series, Value};
