//! Worker process ownership and the correlated command channel.
//!
//! One [`supervisor::WorkerSupervisor`] owns exactly one OS-level worker
//! process. The worker is reachable only through its standard streams; the
//! [`link::WorkerLink`] turns those streams into a strictly-serialized
//! command/response channel plus a broadcast of unsolicited domain events,
//! classified by [`router`].

pub mod link;
pub mod router;
pub mod supervisor;

pub use link::{WorkerClient, WorkerLink};
pub use router::WorkerEvent;
pub use supervisor::WorkerSupervisor;
