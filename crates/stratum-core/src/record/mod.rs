//! Record API.
//!
//! [`RecordService`] serves CRUD requests against a compiled application,
//! enforcing the access policies of each table before storage is touched and
//! redacting every record on the way out.

mod error;
mod query;
mod service;
mod validate;

pub use error::{RecordError, RecordResult};
pub use query::{ListQuery, ListResponse, DEFAULT_LIMIT, MAX_LIMIT};
pub use service::{RecordService, TableSummary};
