//! The worker-process side of the supervisor/worker split.

mod server;

pub use server::serve;
