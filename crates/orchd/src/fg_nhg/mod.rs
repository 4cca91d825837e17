//! Fine-grained ECMP: explicitly programmed hash buckets preserved across
//! membership changes.

mod orch;
mod types;

pub use orch::{fg_route_del, fg_route_set, managed_group, FgNhgOrch};
pub use types::{Bucket, FgNhgGroup, FgNhgState};
