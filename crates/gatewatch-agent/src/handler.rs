//! Handler callbacks supplied by the embedding agent.

use crate::event::AnalysisEvent;
use crate::ipc::PeerInfo;
use gatewatch_proto::{Acknowledgement, CancelRequests};

/// Callbacks invoked by the agent as peers connect and submit work.
///
/// All callbacks run on the reactor thread, so they should return quickly.
/// [`on_analysis_requested`](Self::on_analysis_requested) hands the event
/// over by value; the handler may move it to a worker thread and reply
/// after returning. Events created from a peer remain sendable after that
/// peer disconnects, failing with [`crate::AgentError::Closed`].
///
/// Implementations must be `Send + Sync`: the handler itself is the only
/// SDK object shared across threads.
pub trait AgentHandler: Send + Sync + 'static {
    /// A peer attached to the endpoint. Always precedes the first
    /// [`on_analysis_requested`](Self::on_analysis_requested) for that
    /// peer.
    fn on_connected(&self, peer: &PeerInfo) {
        let _ = peer;
    }

    /// A peer detached. Fired at most once per connection, after the last
    /// request from that peer was dispatched.
    fn on_disconnected(&self, peer: &PeerInfo) {
        let _ = peer;
    }

    /// A peer asked the agent to analyze a user action. The prefilled
    /// response is an allow verdict; update it and call
    /// [`AnalysisEvent::send`] when the verdict is known.
    fn on_analysis_requested(&self, event: AnalysisEvent);

    /// The peer confirmed receipt of a response, with its terminal status.
    fn on_response_acknowledged(&self, ack: &Acknowledgement) {
        let _ = ack;
    }

    /// The peer abandoned the listed outstanding requests. In-flight
    /// handler work is not interrupted; sends for these tokens may still
    /// be attempted and simply go unanswered.
    fn on_cancel_requests(&self, cancel: &CancelRequests) {
        let _ = cancel;
    }
}
