// ── Event channel seam ──
//
// The cache layer talks to the push channel through this trait so the
// merge engine and address subscriptions can run against an in-process
// channel in tests and against the WebSocket connection in production.

use std::sync::Arc;

use poolwatch_api::{ControlMessage, StreamConnection, StreamEvent, StreamState};
use tokio::sync::{broadcast, watch};

/// A shared, multiplexed source of stream events that also accepts
/// control messages.
pub trait EventChannel: Send + Sync + 'static {
    /// Subscribe to every inbound event.
    fn events(&self) -> broadcast::Receiver<Arc<StreamEvent>>;

    /// Send a control message. Returns `false` if it was dropped.
    fn emit(&self, message: &ControlMessage) -> bool;

    /// Observe the connection state.
    fn state(&self) -> watch::Receiver<StreamState>;

    /// Why the channel gave up reconnecting, if it did.
    fn last_failure(&self) -> Option<String> {
        None
    }

    /// Tear the channel down.
    fn close(&self) {}
}

impl EventChannel for StreamConnection {
    fn events(&self) -> broadcast::Receiver<Arc<StreamEvent>> {
        self.subscribe()
    }

    fn emit(&self, message: &ControlMessage) -> bool {
        StreamConnection::emit(self, message)
    }

    fn state(&self) -> watch::Receiver<StreamState> {
        StreamConnection::state(self)
    }

    fn last_failure(&self) -> Option<String> {
        StreamConnection::last_failure(self)
    }

    fn close(&self) {
        self.disconnect();
    }
}
