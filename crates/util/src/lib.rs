//! Small helpers shared by the Beacon crates: path expansion and
//! endpoint redaction for logs and status output.

mod endpoint;
mod path_processing;

pub use endpoint::{or_unknown, sanitize_endpoint, sanitize_target};
pub use path_processing::expand_tilde;
