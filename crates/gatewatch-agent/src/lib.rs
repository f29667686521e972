#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! Agent-side IPC core of the gatewatch content-analysis SDK.
//!
//! A gatewatch agent listens on a platform-specific named endpoint (a Unix
//! domain socket, or a named pipe on Windows), accepts concurrent
//! connections from peer browser processes, and exchanges length-delimited
//! messages implementing a request/verdict/acknowledgement protocol: the
//! peer asks the agent to examine a user-initiated action (file upload,
//! paste, print, download, file transfer) and the agent replies with an
//! allow or block verdict before the action proceeds.
//!
//! One reactor thread serves every connection cooperatively. Handler
//! callbacks run on that thread, but an [`AnalysisEvent`] may be moved to a
//! worker and answered later; the agent imposes no ordering beyond the
//! per-peer order in which requests came off the wire.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gatewatch_agent::{Agent, AgentConfig, AgentHandler, AnalysisEvent};
//!
//! struct AllowEverything;
//!
//! impl AgentHandler for AllowEverything {
//!     fn on_analysis_requested(&self, mut event: AnalysisEvent) {
//!         // The prefilled response is already an allow verdict.
//!         let _ = event.send();
//!     }
//! }
//!
//! let mut agent = Agent::new(
//!     AgentConfig {
//!         name: "content_analysis".to_string(),
//!         user_specific: false,
//!     },
//!     Arc::new(AllowEverything),
//! )
//! .expect("channel available");
//!
//! let stop = agent.stop_handle();
//! // stop.stop() from any thread unblocks handle_events.
//! agent.handle_events().expect("event loop");
//! # drop(stop);
//! ```

mod agent;
mod connection;
mod error;
mod event;
mod framing;
mod handler;
mod ipc;
mod reactor;

pub use agent::{Agent, AgentConfig, StopHandle};
pub use error::AgentError;
pub use event::AnalysisEvent;
pub use handler::AgentHandler;
pub use ipc::PeerInfo;

// Re-exported so handlers can name message types without a separate
// dependency on the protocol crate.
pub use gatewatch_proto as proto;
