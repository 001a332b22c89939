use crossbeam_channel::{bounded, Receiver, Sender};
use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use crate::core::{Downstream, RecordHeader, RecordSink, StageState, UNKNOWN_RECORD_COUNT};
use crate::error::{Error, Result};

/// Buffers cycling between the assembling thread and the dispatch worker
const DISPATCH_BUFFERS: usize = 2;

enum Dispatch {
    Header(RecordHeader),
    Record(Vec<i32>),
}

struct JoinPlan {
    input: Range<usize>,
    output_offset: usize,
}

struct DispatchWorker {
    filled_tx: Sender<Dispatch>,
    empty_rx: Receiver<Vec<i32>>,
    handle: JoinHandle<Result<()>>,
}

type FailureSlot = Arc<Mutex<Option<Error>>>;

/// Concatenates `factor` consecutive records into one longer record.
///
/// Assembled records are handed to a single dispatch thread through a
/// one-slot queue, so downstream I/O overlaps with assembly while records
/// still leave in arrival order. Failures on the dispatch thread are
/// reported by the next call on the stage.
pub struct RecordJoinStage {
    factor: usize,
    plan: Vec<JoinPlan>,
    input_size: usize,
    assembly: Vec<i32>,
    position: usize,
    downstream: Option<Downstream>,
    worker: Option<DispatchWorker>,
    failure: FailureSlot,
    state: StageState,
    layout: Option<RecordHeader>,
}

impl RecordJoinStage {
    pub fn new(factor: usize) -> Result<Self> {
        if factor == 0 {
            return Err(Error::config("join factor must be positive"));
        }
        Ok(Self {
            factor,
            plan: Vec::new(),
            input_size: 0,
            assembly: Vec::new(),
            position: 0,
            downstream: Some(Downstream::new()),
            worker: None,
            failure: Arc::new(Mutex::new(None)),
            state: StageState::Unconfigured,
            layout: None,
        })
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    pub fn add_sink(&mut self, sink: impl RecordSink + 'static) -> Result<()> {
        self.add_boxed_sink(Box::new(sink))
    }

    pub fn add_boxed_sink(&mut self, sink: Box<dyn RecordSink>) -> Result<()> {
        match (&mut self.downstream, self.state) {
            (Some(downstream), StageState::Unconfigured) => {
                downstream.push_boxed(sink);
                Ok(())
            }
            _ => Err(Error::state("sinks must be added before the header is set")),
        }
    }

    pub fn output_header(&self, input: &RecordHeader) -> RecordHeader {
        let mut output = input.clone();
        for spec in &mut output.channels {
            spec.samples_per_record *= self.factor;
        }
        output.duration_of_record *= self.factor as f64;
        if output.number_of_records != UNKNOWN_RECORD_COUNT {
            output.number_of_records /= self.factor as i64;
        }
        output
    }

    fn take_failure(&self) -> Result<()> {
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn spawn_worker(&mut self, downstream: Downstream) -> Result<()> {
        let (filled_tx, filled_rx) = bounded::<Dispatch>(1);
        let (empty_tx, empty_rx) = bounded::<Vec<i32>>(DISPATCH_BUFFERS);
        for _ in 0..DISPATCH_BUFFERS {
            empty_tx
                .send(vec![0; self.assembly.len()])
                .map_err(|_| Error::state("dispatch buffer queue closed"))?;
        }

        let failure = self.failure.clone();
        let handle = thread::Builder::new()
            .name("record-join-dispatch".to_string())
            .spawn(move || run_dispatch(downstream, filled_rx, empty_tx, failure))?;

        self.worker = Some(DispatchWorker { filled_tx, empty_rx, handle });
        Ok(())
    }

    fn dispatch(&mut self) -> Result<()> {
        let worker = match &self.worker {
            Some(worker) => worker,
            None => return Ok(()),
        };
        // blocks while both buffers are in flight
        let mut buffer = worker
            .empty_rx
            .recv()
            .map_err(|_| Error::state("record dispatch worker has stopped"))?;
        buffer.copy_from_slice(&self.assembly);
        worker
            .filled_tx
            .send(Dispatch::Record(buffer))
            .map_err(|_| Error::state("record dispatch worker has stopped"))
    }

    fn shutdown_worker(&mut self) -> Result<()> {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return Ok(()),
        };
        drop(worker.filled_tx);
        match worker.handle.join() {
            Ok(result) => result,
            Err(_) => Err(Error::state("record dispatch worker panicked")),
        }
    }
}

impl RecordSink for RecordJoinStage {
    fn set_header(&mut self, header: &RecordHeader) -> Result<()> {
        self.take_failure()?;
        header.validate()?;
        if let Some(previous) = &self.layout {
            if !previous.same_layout(header) {
                return Err(Error::IncompatibleHeader(
                    "join stage cannot change record layout after configuration".to_string(),
                ));
            }
            if self.state.records() > 0 && !previous.same_scaling(header) {
                return Err(Error::IncompatibleHeader(
                    "join stage cannot rescale channels after records were written".to_string(),
                ));
            }
        }
        let first = self.state.configure()?;
        let output = self.output_header(header);
        self.layout = Some(header.clone());

        if !first {
            // renegotiation is queued behind records already dispatched
            return match (&self.worker, &mut self.downstream) {
                (Some(worker), _) => worker
                    .filled_tx
                    .send(Dispatch::Header(output))
                    .map_err(|_| Error::state("record dispatch worker has stopped")),
                (None, Some(downstream)) => downstream.set_header(&output),
                (None, None) => Ok(()),
            };
        }

        let output_offsets = output.channel_offsets();
        self.plan = (0..header.channel_count())
            .map(|channel| JoinPlan {
                input: header.channel_range(channel),
                output_offset: output_offsets[channel],
            })
            .collect();
        self.input_size = header.record_size();
        self.assembly = vec![0; output.record_size()];

        let mut downstream = self.downstream.take().unwrap_or_default();
        downstream.set_header(&output)?;
        if downstream.is_empty() {
            self.downstream = Some(downstream);
            return Ok(());
        }
        self.spawn_worker(downstream)
    }

    fn write_record(&mut self, record: &[i32]) -> Result<()> {
        self.take_failure()?;
        self.state.record_written()?;
        if record.len() != self.input_size {
            return Err(Error::config(format!(
                "record of {} samples, expected {}",
                record.len(),
                self.input_size
            )));
        }
        if self.worker.is_none() {
            return Ok(());
        }

        let slot = self.position % self.factor;
        for plan in &self.plan {
            let len = plan.input.len();
            let start = plan.output_offset + slot * len;
            self.assembly[start..start + len].copy_from_slice(&record[plan.input.clone()]);
        }
        self.position += 1;

        if slot + 1 == self.factor {
            self.dispatch()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.state.close() {
            return Ok(());
        }
        let pending = self.position % self.factor;
        if pending != 0 {
            log::warn!(
                "Join stage closing with {} of {} records of an incomplete output record, dropped",
                pending,
                self.factor
            );
        }

        let result = if self.worker.is_some() {
            self.shutdown_worker()
        } else if let Some(downstream) = &mut self.downstream {
            downstream.close()
        } else {
            Ok(())
        };
        self.take_failure()?;
        result
    }
}

impl Drop for RecordJoinStage {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.shutdown_worker() {
                log::warn!("Join stage dropped without close: {}", e);
            }
        }
    }
}

fn run_dispatch(
    mut downstream: Downstream,
    filled_rx: Receiver<Dispatch>,
    empty_tx: Sender<Vec<i32>>,
    failure: FailureSlot,
) -> Result<()> {
    let mut failed = false;

    for message in filled_rx.iter() {
        let outcome = match message {
            Dispatch::Record(buffer) => {
                let outcome = if failed { Ok(()) } else { downstream.write_record(&buffer) };
                // the assembling side may have gone away during close
                let _ = empty_tx.send(buffer);
                outcome
            }
            Dispatch::Header(header) if !failed => downstream.set_header(&header),
            Dispatch::Header(_) => Ok(()),
        };

        if let Err(e) = outcome {
            log::warn!("Record dispatch failed, discarding further records: {}", e);
            failed = true;
            failure
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get_or_insert(e);
        }
    }

    downstream.close()
}
