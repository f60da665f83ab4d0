//! Upstream adapter: one `execute(action, payload)` call over the
//! spreadsheet backend's GET/POST dialects and its mixed response shapes.

pub mod response;
pub mod transform;
pub mod upstream;

pub use response::{FailureKind, UpstreamFailure, UpstreamResult};
pub use upstream::{UpstreamClient, UpstreamStore};
