//! Supervisor for the managed capability backend.
//!
//! Spawns the backend in the foreground or detached, records its identity in a
//! state file, discovers late-bound endpoints, probes readiness and stops it with
//! an escalating shutdown.

pub mod command;
pub mod contract;
pub mod endpoint;
pub mod errors;
pub mod health;
pub mod logs;
pub mod process;
pub mod state;
pub mod supervisor;

pub use command::{BackendCommand, SERVER_COMMAND_ENV, UpOptions};
pub use contract::{ConnectionDescriptor, ContractDetails};
pub use endpoint::{CaptureOutcome, EndpointCapture, compute_mcp_url, normalize_mcp_path, spawn_endpoint_capture};
pub use errors::HostError;
pub use health::{HealthInfo, RemoteStatus, check_health, probe_remote};
pub use logs::{log_path, read_log_tail, tail_log_lines};
pub use process::{process_alive, terminate_process};
pub use state::{ManagedProcessState, StateStore};
pub use supervisor::{DetachedBackend, DownOutcome, Supervisor};
