//! Periodic heartbeat sent to every connection.

use log::debug;
use shared::Message;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Queues a heartbeat every `period` until the connection's outbound queue closes.
///
/// Ticks are scheduled against the first deadline rather than the previous
/// send, so a slow send does not push later heartbeats back.
pub async fn run_heartbeat(outbound: mpsc::Sender<Message>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sequence: u32 = 0;

    loop {
        ticker.tick().await;
        sequence = sequence.wrapping_add(1);
        if outbound.send(Message::Heartbeat { sequence }).await.is_err() {
            debug!("Heartbeat stopped at sequence {}", sequence);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_sequence_increments() {
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_heartbeat(tx, Duration::from_millis(2500)));

        let started = Instant::now();
        for expected in 1..=3u32 {
            match rx.recv().await {
                Some(Message::Heartbeat { sequence }) => assert_eq!(sequence, expected),
                other => panic!("expected a heartbeat, got {:?}", other),
            }
        }
        assert!(started.elapsed() >= Duration::from_millis(7500));

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_stops_when_queue_closes() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        tokio::time::timeout(
            Duration::from_secs(10),
            run_heartbeat(tx, Duration::from_millis(2500)),
        )
        .await
        .expect("heartbeat task should end once the queue is closed");
    }
}
