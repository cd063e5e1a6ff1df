use crate::application::session::SessionEvent;
use crate::domain::entities::Frame;
use crate::domain::errors::ConnectionError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Write half of a duplex connection, driven by the session loop
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSender: Send {
    /// Transmits one text frame
    async fn send(&mut self, frame: Frame) -> Result<(), ConnectionError>;

    /// Releases the transport; calling it again is a no-op
    async fn close(&mut self);
}

/// Read half of a duplex connection, owned by the background receiver
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Waits for the next frame; fails once the connection is closed
    async fn receive(&mut self) -> Result<Frame, ConnectionError>;
}

/// Forwards every received frame into the session's event queue.
///
/// The task ends after the first error, which is delivered as a final
/// [`SessionEvent::Disconnected`], or as soon as the queue is dropped.
pub fn spawn_receiver<S: FrameSource>(
    mut source: S,
    events: mpsc::Sender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match source.receive().await {
                Ok(frame) => {
                    if events.send(SessionEvent::Inbound(frame)).await.is_err() {
                        debug!("event queue dropped, stopping receiver");
                        return;
                    }
                }
                Err(err) => {
                    debug!(error = %err, "receiver stopped");
                    let _ = events.send(SessionEvent::Disconnected(err)).await;
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Result<Frame, ConnectionError>>);

    #[async_trait]
    impl FrameSource for Scripted {
        async fn receive(&mut self) -> Result<Frame, ConnectionError> {
            self.0
                .pop_front()
                .unwrap_or(Err(ConnectionError::Closed(None)))
        }
    }

    #[tokio::test]
    async fn frames_are_forwarded_in_order_then_the_error() {
        let source = Scripted(VecDeque::from(vec![
            Ok(Frame::new("a")),
            Ok(Frame::new("b")),
            Ok(Frame::new("c")),
            Err(ConnectionError::Receive("reset".into())),
            Ok(Frame::new("never")),
        ]));
        let (tx, mut rx) = mpsc::channel(8);
        spawn_receiver(source, tx).await.unwrap();

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                SessionEvent::Inbound(Frame::new("a")),
                SessionEvent::Inbound(Frame::new("b")),
                SessionEvent::Inbound(Frame::new("c")),
                SessionEvent::Disconnected(ConnectionError::Receive("reset".into())),
            ]
        );
    }

    #[tokio::test]
    async fn receiver_stops_when_the_queue_is_dropped() {
        let frames = (0..10).map(|i| Ok(Frame::new(i.to_string()))).collect();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        // Finishes instead of draining the whole script
        spawn_receiver(Scripted(frames), tx).await.unwrap();
    }
}
