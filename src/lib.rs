pub mod asc;
pub mod cli;
pub mod config;
pub mod logging;
pub mod output;
pub mod util;

pub use asc::AppStoreConnectClient;
pub use asc::error::AscError;
pub use config::Config;
pub use util::{compare_runs_desc, is_branch_git_ref, pretty_run_status, resource_id, resource_name};
