//! Per-request event handed to the handler.

use crate::connection::SharedTransport;
use crate::error::AgentError;
use crate::ipc::PeerInfo;
use gatewatch_proto::{
    encode_message, AgentToPeer, AnalysisRequest, AnalysisResponse, RuleAction, TriggeredRule,
};
use std::sync::Arc;
use tracing::trace;

/// One in-flight content-analysis request.
///
/// The event shares the originating connection's transport and stays usable
/// after that connection has moved on; a send against a reset or shut-down
/// transport reports [`AgentError::Closed`].
///
/// The response is prefilled with an allow verdict: a single result with
/// status `Success`, the first request tag (or none), and no triggered
/// rules. An agent that allows the action can call [`send`](Self::send)
/// without touching the response.
///
/// The event is not internally synchronized. It may be moved to another
/// thread and answered after `on_analysis_requested` returns, but access
/// to a single event must be serialized by the handler.
pub struct AnalysisEvent {
    transport: Option<Arc<SharedTransport>>,
    peer: PeerInfo,
    request: AnalysisRequest,
    response: AnalysisResponse,
    sent: bool,
}

impl AnalysisEvent {
    pub(crate) fn new(
        transport: Arc<SharedTransport>,
        peer: PeerInfo,
        request: AnalysisRequest,
    ) -> Self {
        let tag = request.tags.first().cloned().unwrap_or_default();
        let response = AnalysisResponse::prefilled(request.request_token.clone(), tag);
        Self {
            transport: Some(transport),
            peer,
            request,
            response,
            sent: false,
        }
    }

    /// Identity of the peer that sent this request.
    #[must_use]
    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    /// The request as received, read-only.
    #[must_use]
    pub fn request(&self) -> &AnalysisRequest {
        &self.request
    }

    /// The response that [`send`](Self::send) will transmit.
    #[must_use]
    pub fn response(&self) -> &AnalysisResponse {
        &self.response
    }

    /// Mutable access to the response, for verdicts beyond what
    /// [`set_verdict`](Self::set_verdict) covers.
    pub fn response_mut(&mut self) -> &mut AnalysisResponse {
        &mut self.response
    }

    /// Set the verdict: the action on the first triggered rule of the
    /// first result, creating both if absent.
    pub fn set_verdict(&mut self, action: RuleAction) {
        let result = self.response.ensure_result();
        if result.triggered_rules.is_empty() {
            result.triggered_rules.push(TriggeredRule::default());
        }
        result.triggered_rules[0].action = action;
    }

    /// Convenience for [`set_verdict`](Self::set_verdict) with
    /// [`RuleAction::Block`].
    pub fn set_verdict_to_block(&mut self) {
        self.set_verdict(RuleAction::Block);
    }

    /// Serialize the current response and transmit it to the peer.
    ///
    /// Whatever is in the response at the moment of the call goes out;
    /// later changes are never transmitted.
    ///
    /// # Errors
    /// - [`AgentError::AlreadySent`] if a send already succeeded.
    /// - [`AgentError::Closed`] after [`close`](Self::close), or when the
    ///   transport was closed by a connection reset or agent shutdown.
    pub fn send(&mut self) -> Result<(), AgentError> {
        let Some(transport) = &self.transport else {
            return Err(AgentError::Closed);
        };
        if self.sent {
            return Err(AgentError::AlreadySent);
        }
        if transport.is_closed() {
            return Err(AgentError::Closed);
        }
        let payload = encode_message(&AgentToPeer::Response(self.response.clone()))?;
        transport.write_all(&payload)?;
        self.sent = true;
        trace!(token = %self.response.request_token, "response sent");
        Ok(())
    }

    /// Release the transport reference. Every later [`send`](Self::send)
    /// fails with [`AgentError::Closed`].
    pub fn close(&mut self) {
        self.transport = None;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ipc::IpcStream;
    use gatewatch_proto::{decode_message, ResultStatus};

    fn test_event(tags: Vec<String>) -> (AnalysisEvent, IpcStream, Arc<SharedTransport>) {
        let (server, client) = IpcStream::pair().unwrap();
        let shared = Arc::new(SharedTransport::new(server));
        let request = AnalysisRequest::new("req-1", tags);
        let event = AnalysisEvent::new(Arc::clone(&shared), PeerInfo::default(), request);
        (event, client, shared)
    }

    async fn read_response(client: &IpcStream) -> AnalysisResponse {
        client.readable().await.unwrap();
        let mut header = [0u8; 4];
        assert_eq!(client.try_read(&mut header).unwrap(), 4);
        let len = u32::from_le_bytes(header) as usize;
        let mut payload = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            client.readable().await.unwrap();
            filled += client.try_read(&mut payload[filled..]).unwrap();
        }
        let AgentToPeer::Response(response) = decode_message(&payload).unwrap();
        response
    }

    #[tokio::test]
    async fn test_response_prefilled_with_allow() {
        let (event, _client, _shared) = test_event(vec!["dlp".to_string()]);
        let response = event.response();
        assert_eq!(response.request_token, "req-1");
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].status, ResultStatus::Success);
        assert_eq!(response.results[0].tag, "dlp");
        assert!(response.results[0].triggered_rules.is_empty());
    }

    #[tokio::test]
    async fn test_prefill_without_tags_leaves_tag_empty() {
        let (event, _client, _shared) = test_event(Vec::new());
        assert_eq!(event.response().results[0].tag, "");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_transmits_default_verdict() {
        let (mut event, client, _shared) = test_event(vec!["dlp".to_string()]);
        event.send().unwrap();

        let response = read_response(&client).await;
        assert_eq!(response.request_token, "req-1");
        assert_eq!(response.results[0].status, ResultStatus::Success);
        assert!(response.results[0].triggered_rules.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_block_verdict_reaches_peer() {
        let (mut event, client, _shared) = test_event(vec!["dlp".to_string()]);
        event.set_verdict_to_block();
        event.send().unwrap();

        let response = read_response(&client).await;
        assert_eq!(response.results[0].triggered_rules.len(), 1);
        assert_eq!(
            response.results[0].triggered_rules[0].action,
            RuleAction::Block
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_send_fails() {
        let (mut event, _client, _shared) = test_event(vec!["dlp".to_string()]);
        event.send().unwrap();
        assert!(matches!(event.send(), Err(AgentError::AlreadySent)));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (mut event, _client, _shared) = test_event(vec!["dlp".to_string()]);
        event.close();
        assert!(matches!(event.send(), Err(AgentError::Closed)));
    }

    #[tokio::test]
    async fn test_send_after_transport_closed_fails() {
        let (mut event, _client, shared) = test_event(vec!["dlp".to_string()]);
        shared.close();
        assert!(matches!(event.send(), Err(AgentError::Closed)));
    }

    #[tokio::test]
    async fn test_set_verdict_overwrites_first_rule() {
        let (mut event, _client, _shared) = test_event(vec!["dlp".to_string()]);
        event.set_verdict(RuleAction::Warn);
        event.set_verdict(RuleAction::Block);
        let rules = &event.response().results[0].triggered_rules;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].action, RuleAction::Block);
    }
}
