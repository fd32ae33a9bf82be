//! Event fan-out.
//!
//! The analysis worker pushes events into unbounded mpsc channels (it
//! must never block); a forwarder task per channel re-publishes into a
//! bounded broadcast channel so any number of consumers can subscribe
//! late. Slow consumers lag and skip rather than stall the pipeline.

use futures_util::Stream;
use tokio::sync::{broadcast, mpsc};

/// Ring capacity per broadcast channel; older events are overwritten
/// when a subscriber falls this far behind
pub const BROADCAST_CAPACITY: usize = 100;

/// Bridge an mpsc receiver into a broadcast sender.
///
/// Runs until the mpsc side closes. Send errors just mean no
/// subscriber is currently listening; events are dropped silently.
pub fn forward<T: Clone + Send + 'static>(
    mut rx: mpsc::UnboundedReceiver<T>,
    tx: broadcast::Sender<T>,
) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let _ = tx.send(event);
        }
    });
}

/// Turn a broadcast subscription into a `Stream`, skipping over lag
/// gaps instead of ending.
pub fn subscribe_stream<T: Clone + Send + 'static>(
    tx: &broadcast::Sender<T>,
) -> impl Stream<Item = T> + Send {
    let rx = tx.subscribe();
    futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("event stream lagged, skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn events_flow_mpsc_to_subscriber() {
        let (mpsc_tx, mpsc_rx) = mpsc::unbounded_channel::<u32>();
        let (bcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        let mut stream = Box::pin(subscribe_stream(&bcast_tx));
        forward(mpsc_rx, bcast_tx);

        mpsc_tx.send(1).unwrap();
        mpsc_tx.send(2).unwrap();

        assert_eq!(stream.next().await, Some(1));
        assert_eq!(stream.next().await, Some(2));
    }

    #[tokio::test]
    async fn late_subscriber_sees_only_new_events() {
        let (mpsc_tx, mpsc_rx) = mpsc::unbounded_channel::<u32>();
        let (bcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        forward(mpsc_rx, bcast_tx.clone());

        // No subscriber yet: dropped on the broadcast side
        mpsc_tx.send(1).unwrap();
        tokio::task::yield_now().await;

        let mut stream = Box::pin(subscribe_stream(&bcast_tx));
        mpsc_tx.send(2).unwrap();
        assert_eq!(stream.next().await, Some(2));
    }

    #[tokio::test]
    async fn stream_ends_when_producer_drops() {
        let (bcast_tx, _) = broadcast::channel::<u32>(BROADCAST_CAPACITY);
        let mut stream = Box::pin(subscribe_stream(&bcast_tx));
        bcast_tx.send(7).unwrap();
        assert_eq!(stream.next().await, Some(7));
        drop(bcast_tx);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_and_continues() {
        let (bcast_tx, _) = broadcast::channel::<u32>(4);
        let mut stream = Box::pin(subscribe_stream(&bcast_tx));

        // Overflow the 4-slot ring before polling
        for i in 0..10 {
            bcast_tx.send(i).unwrap();
        }

        // First poll reports the lag internally and yields a
        // still-buffered event; the stream keeps going
        let first = stream.next().await.unwrap();
        assert!(first >= 6);
        let second = stream.next().await.unwrap();
        assert_eq!(second, first + 1);
    }
}
