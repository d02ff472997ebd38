//! Encode progress delivery

use std::sync::mpsc::{channel, Receiver, Sender};

use gifkit_types::{BoxError, ProgressEvent};

/// Receives one event per encoded frame, in frame order.
/// Returning an error aborts the encode.
pub trait ProgressSink {
    fn report(&mut self, event: ProgressEvent) -> Result<(), BoxError>;
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressEvent) -> Result<(), BoxError>,
{
    fn report(&mut self, event: ProgressEvent) -> Result<(), BoxError> {
        self(event)
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _event: ProgressEvent) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Pushes events into an unbounded channel. A dropped receiver is not an error.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<ProgressEvent>,
}

impl ProgressSink for ChannelSink {
    fn report(&mut self, event: ProgressEvent) -> Result<(), BoxError> {
        let _ = self.tx.send(event);
        Ok(())
    }
}

pub fn progress_channel() -> (ChannelSink, Receiver<ProgressEvent>) {
    let (tx, rx) = channel();
    (ChannelSink { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_delivers_in_order() {
        let (mut sink, rx) = progress_channel();
        for encoded in 1..=3 {
            sink.report(ProgressEvent { total: 3, encoded }).unwrap();
        }
        drop(sink);
        let seen: Vec<u32> = rx.iter().map(|e| e.encoded).collect();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (mut sink, rx) = progress_channel();
        drop(rx);
        assert!(sink.report(ProgressEvent { total: 1, encoded: 1 }).is_ok());
    }

    #[test]
    fn test_closure_sink() {
        let mut count = 0;
        let mut sink = |_event: ProgressEvent| -> Result<(), BoxError> {
            count += 1;
            Ok(())
        };
        sink.report(ProgressEvent { total: 1, encoded: 1 }).unwrap();
        drop(sink);
        assert_eq!(count, 1);
    }
}
