//! Pipeline tasks
//!
//! - **consumer**: ingest (broker → rendezvous) and process (rendezvous → store)
//! - **producer**: dispatch (rendezvous → broker) and caller-side send
//! - **rendezvous**: zero-capacity handoff between stages
//! - **supervisor**: shared cancellation and bounded shutdown

pub mod consumer;
pub mod producer;
pub mod rendezvous;
pub mod supervisor;

pub use consumer::Consumer;
pub use producer::Producer;
pub use rendezvous::{
    rendezvous, Acknowledgement, HandoffClosed, HandoffPermit, HandoffReceiver, HandoffSender,
};
pub use supervisor::{ShutdownReport, Supervisor};
