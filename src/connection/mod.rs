//! Receiver and transmitter connections
//!
//! Both ends talk to their modem the same way: a [`StreamDriver`](crate::driver::StreamDriver)
//! owns the socket and hands decoded frames to a role-specific handler. The
//! connections here wire that driver to the rest of the crate and expose a small
//! control surface shared through [`LinkControl`].

pub mod receiver;
pub mod transmitter;

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::driver::{DriverChannels, LinkState};
use crate::{LinkError, Result};

pub use receiver::{ReceiverConnection, ReceiverDispatch};
pub use transmitter::{TransmitterConnection, TransmitterDispatch};

/// Start/stop control and state observation for a running driver.
#[derive(Debug)]
pub struct LinkControl {
    state: watch::Receiver<LinkState>,
    streaming: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl LinkControl {
    pub(crate) fn new(channels: &DriverChannels) -> Self {
        Self {
            state: channels.state.clone(),
            streaming: channels.streaming.clone(),
            cancel: channels.cancel.clone(),
        }
    }

    /// Begin streaming once the link is connected.
    pub fn start(&self) {
        debug!("Start requested");
        self.streaming.send_replace(true);
    }

    /// Stop streaming; the driver drains and releases the socket.
    pub fn stop(&self) {
        debug!("Stop requested");
        self.streaming.send_replace(false);
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Watch receiver for state changes.
    pub fn state_updates(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Wait until the link reaches `target`.
    pub async fn wait_for_state(&self, target: LinkState, timeout: Duration) -> Result<()> {
        let mut state = self.state.clone();
        tokio::time::timeout(timeout, state.wait_for(|s| *s == target))
            .await
            .map_err(|_| LinkError::timeout(format!("waiting for {:?}", target), timeout))?
            .map(|_| ())
            .map_err(|_| LinkError::channel_closed("link state"))
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> (LinkControl, watch::Sender<LinkState>, watch::Receiver<bool>) {
        let (state_tx, state_rx) = watch::channel(LinkState::Idle);
        let (streaming_tx, streaming_rx) = watch::channel(false);
        let control =
            LinkControl { state: state_rx, streaming: streaming_tx, cancel: CancellationToken::new() };
        (control, state_tx, streaming_rx)
    }

    #[test]
    fn start_and_stop_toggle_streaming() {
        let (control, _state, streaming) = control();
        control.start();
        assert!(*streaming.borrow());
        control.stop();
        assert!(!*streaming.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_state_times_out() {
        let (control, _state, _streaming) = control();
        let err = control.wait_for_state(LinkState::Streaming, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout { .. }));
    }

    #[tokio::test]
    async fn wait_for_state_sees_transition() {
        let (control, state, _streaming) = control();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            state.send_replace(LinkState::Connected);
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        control.wait_for_state(LinkState::Connected, Duration::from_secs(1)).await.unwrap();
        assert_eq!(control.state(), LinkState::Connected);
    }
}
