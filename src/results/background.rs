//! Background persistence on a dedicated writer thread.
//!
//! Records travel over a bounded channel so the stepping thread never waits
//! on the disk unless the queue is full and the policy says to block.

use super::{RecordSink, ResultsError, ResultsWriter, SinkReport};
use crate::config::OverflowPolicy;
use crate::snapshot::ResultRecord;
use crossbeam_channel::{bounded, Sender, TrySendError};
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// `RecordSink` that hands records to a writer thread
pub struct BackgroundWriter {
    sender: Option<Sender<ResultRecord>>,
    handle: Option<JoinHandle<Result<(), ResultsError>>>,
    policy: OverflowPolicy,
    written: Arc<AtomicU64>,
    dropped: u64,
}

impl BackgroundWriter {
    /// Move `writer` onto its own thread behind a queue of `capacity` records
    pub fn spawn(
        mut writer: ResultsWriter,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Result<Self, ResultsError> {
        let (sender, receiver) = bounded::<ResultRecord>(capacity.max(1));
        let written = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&written);
        let dir = writer.dir().to_path_buf();

        let handle = thread::Builder::new()
            .name("results-writer".to_string())
            .spawn(move || -> Result<(), ResultsError> {
                for record in receiver {
                    writer.write(record)?;
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                writer.close()?;
                Ok(())
            })
            .map_err(|source| ResultsError::Io { path: dir, source })?;

        debug!(
            "Background results writer started (queue {}, {:?})",
            capacity, policy
        );

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            policy,
            written,
            dropped: 0,
        })
    }

    /// Records discarded so far under `DropIntermediate`
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn report(&self) -> SinkReport {
        SinkReport {
            written: self.written.load(Ordering::Relaxed),
            dropped: self.dropped,
        }
    }

    /// Stop accepting records and wait for the thread to finish
    fn join(&mut self) -> Result<(), ResultsError> {
        self.sender = None;
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ResultsError::Background("writer thread panicked".to_string()))?,
            None => Ok(()),
        }
    }

    /// The thread hung up: fetch the error that stopped it
    fn failure(&mut self) -> ResultsError {
        match self.join() {
            Err(e) => e,
            Ok(()) => ResultsError::Closed,
        }
    }

    fn send_blocking(&mut self, record: ResultRecord) -> Result<(), ResultsError> {
        let sender = self.sender.as_ref().ok_or(ResultsError::Closed)?;
        if sender.send(record).is_err() {
            return Err(self.failure());
        }
        Ok(())
    }
}

impl RecordSink for BackgroundWriter {
    fn write(&mut self, record: ResultRecord) -> Result<bool, ResultsError> {
        match self.policy {
            OverflowPolicy::Block => self.send_blocking(record).map(|_| true),
            OverflowPolicy::DropIntermediate => {
                let sender = self.sender.as_ref().ok_or(ResultsError::Closed)?;
                match sender.try_send(record) {
                    Ok(()) => Ok(true),
                    Err(TrySendError::Full(record)) => {
                        self.dropped += 1;
                        debug!("Results queue full, dropped step {}", record.step_index);
                        Ok(false)
                    }
                    Err(TrySendError::Disconnected(_)) => Err(self.failure()),
                }
            }
        }
    }

    fn write_final(&mut self, record: ResultRecord) -> Result<(), ResultsError> {
        self.send_blocking(record)
    }

    fn close(&mut self) -> Result<SinkReport, ResultsError> {
        self.join()?;
        if self.dropped > 0 {
            warn!(
                "Background writer dropped {} intermediate records",
                self.dropped
            );
        }
        Ok(self.report())
    }
}

impl Drop for BackgroundWriter {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            warn!("Background results writer failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::results::read_records;
    use crate::snapshot::StateSnapshot;
    use crate::state::SimulationState;

    fn record(step_index: u64) -> ResultRecord {
        let config = Config::default();
        let state = SimulationState::initialize(&config, 1).unwrap();
        ResultRecord::new(step_index, StateSnapshot::capture(&state, &config))
    }

    #[test]
    fn test_block_policy_writes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultsWriter::open(dir.path()).unwrap();
        let mut background = BackgroundWriter::spawn(writer, 2, OverflowPolicy::Block).unwrap();

        for i in 0..19 {
            background.write(record(i)).unwrap();
        }
        background.write_final(record(19)).unwrap();
        let report = background.close().unwrap();

        assert_eq!(report, SinkReport { written: 20, dropped: 0 });
        assert_eq!(read_records(dir.path()).unwrap().len(), 20);
    }

    #[test]
    fn test_drop_policy_keeps_final() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultsWriter::open(dir.path()).unwrap();
        let mut background =
            BackgroundWriter::spawn(writer, 1, OverflowPolicy::DropIntermediate).unwrap();

        for i in 0..99 {
            background.write(record(i)).unwrap();
        }
        background.write_final(record(99)).unwrap();
        let report = background.close().unwrap();

        let records = read_records(dir.path()).unwrap();
        assert_eq!(report.written + report.dropped, 100);
        assert_eq!(records.len() as u64, report.written);
        assert_eq!(records.last().unwrap().step_index, 99);
    }

    #[test]
    fn test_thread_error_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultsWriter::open(dir.path()).unwrap();
        let mut background = BackgroundWriter::spawn(writer, 4, OverflowPolicy::Block).unwrap();

        background.write(record(0)).unwrap();
        let second = background.write(record(0));
        let closed = background.close();

        let duplicate = |r: &Result<_, ResultsError>| matches!(r, Err(ResultsError::Duplicate(0)));
        assert!(duplicate(&second.map(|_| ())) || duplicate(&closed.map(|_| ())));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultsWriter::open(dir.path()).unwrap();
        let mut background = BackgroundWriter::spawn(writer, 4, OverflowPolicy::Block).unwrap();
        background.write(record(0)).unwrap();

        assert_eq!(background.close().unwrap().written, 1);
        assert_eq!(background.close().unwrap().written, 1);
        assert!(matches!(background.write(record(1)), Err(ResultsError::Closed)));
    }
}
