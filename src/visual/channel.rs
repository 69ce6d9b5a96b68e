//! Hand frames to another thread over a bounded channel.

use super::{VisualError, Visualizer};
use crate::snapshot::StateSnapshot;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};

/// Create a connected visualizer/receiver pair buffering `capacity` frames
pub fn frame_channel(capacity: usize) -> (ChannelVisualizer, FrameReceiver) {
    let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
    (
        ChannelVisualizer {
            sender,
            sent: 0,
            dropped: 0,
        },
        FrameReceiver {
            receiver,
            disconnected: false,
        },
    )
}

/// Sending half: a `Visualizer` that never blocks the loop
pub struct ChannelVisualizer {
    sender: SyncSender<StateSnapshot>,
    sent: u64,
    dropped: u64,
}

impl ChannelVisualizer {
    /// Frames delivered to the channel
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Frames discarded because the receiver was behind
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Visualizer for ChannelVisualizer {
    fn name(&self) -> &str {
        "channel"
    }

    fn open(&mut self) -> Result<(), VisualError> {
        Ok(())
    }

    fn render(&mut self, snapshot: &StateSnapshot) -> Result<(), VisualError> {
        match self.sender.try_send(snapshot.clone()) {
            Ok(()) => {
                self.sent += 1;
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(VisualError::Disconnected),
        }
    }

    fn close(&mut self) -> Result<(), VisualError> {
        Ok(())
    }
}

/// Receiving half, polled by the render thread
pub struct FrameReceiver {
    receiver: Receiver<StateSnapshot>,
    disconnected: bool,
}

impl FrameReceiver {
    /// Drain the channel and return only the newest frame (non-blocking)
    pub fn latest(&mut self) -> Option<StateSnapshot> {
        let mut latest = None;
        loop {
            match self.receiver.try_recv() {
                Ok(snapshot) => latest = Some(snapshot),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
        latest
    }

    /// Block until the next frame; `None` once the sender is gone
    pub fn recv(&mut self) -> Option<StateSnapshot> {
        match self.receiver.recv() {
            Ok(snapshot) => Some(snapshot),
            Err(_) => {
                self.disconnected = true;
                None
            }
        }
    }

    /// Whether the simulation side has hung up
    pub fn is_finished(&self) -> bool {
        self.disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::SimulationState;

    fn snapshots(count: u64) -> Vec<StateSnapshot> {
        let config = Config::default();
        let mut state = SimulationState::initialize(&config, 2).unwrap();
        (0..count)
            .map(|_| {
                state = state.step(&config).unwrap();
                StateSnapshot::capture(&state, &config)
            })
            .collect()
    }

    #[test]
    fn test_latest_frame_wins() {
        let (mut visual, mut frames) = frame_channel(8);
        for snapshot in snapshots(3) {
            visual.render(&snapshot).unwrap();
        }

        let latest = frames.latest().unwrap();
        assert_eq!(latest.steps_taken, 3);
        assert!(frames.latest().is_none());
        assert!(!frames.is_finished());
    }

    #[test]
    fn test_full_channel_drops_frames() {
        let (mut visual, mut frames) = frame_channel(1);
        for snapshot in snapshots(3) {
            visual.render(&snapshot).unwrap();
        }

        assert_eq!(visual.sent(), 1);
        assert_eq!(visual.dropped(), 2);
        assert_eq!(frames.latest().unwrap().steps_taken, 1);
    }

    #[test]
    fn test_dropped_receiver_disconnects() {
        let (mut visual, frames) = frame_channel(1);
        drop(frames);
        let snapshot = snapshots(1).remove(0);
        assert!(matches!(
            visual.render(&snapshot),
            Err(VisualError::Disconnected)
        ));
    }

    #[test]
    fn test_receiver_sees_hangup() {
        let (visual, mut frames) = frame_channel(1);
        drop(visual);
        assert!(frames.recv().is_none());
        assert!(frames.is_finished());
    }
}
