use std::sync::{Arc, Mutex, MutexGuard};
use crate::core::{RecordHeader, StageState};
use crate::error::{Error, Result};

/// Capability implemented by every stage of the record pipeline.
///
/// A sink receives its own copy of the header before the first record, then a
/// stream of flat records laid out as per-channel blocks in channel order.
pub trait RecordSink: Send {
    /// Adopt `header`. May be called again with the same layout to update metadata.
    fn set_header(&mut self, header: &RecordHeader) -> Result<()>;

    /// Consume one record; its length must equal `header.record_size()`
    fn write_record(&mut self, record: &[i32]) -> Result<()>;

    /// Flush and release resources. A second call is a no-op.
    fn close(&mut self) -> Result<()>;
}

impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    fn set_header(&mut self, header: &RecordHeader) -> Result<()> {
        (**self).set_header(header)
    }

    fn write_record(&mut self, record: &[i32]) -> Result<()> {
        (**self).write_record(record)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RecordSink for NullSink {
    fn set_header(&mut self, _header: &RecordHeader) -> Result<()> {
        Ok(())
    }

    fn write_record(&mut self, _record: &[i32]) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fan-out to zero or more downstream sinks.
///
/// With no sinks registered it behaves as a [`NullSink`], and stages use
/// [`Downstream::is_empty`] to skip transform work nobody consumes.
#[derive(Default)]
pub struct Downstream {
    sinks: Vec<Box<dyn RecordSink>>,
}

impl Downstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: impl RecordSink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn push_boxed(&mut self, sink: Box<dyn RecordSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn each(
        &mut self,
        action: &str,
        mut op: impl FnMut(&mut Box<dyn RecordSink>) -> Result<()>,
    ) -> Result<()> {
        let mut first_error = None;
        for sink in &mut self.sinks {
            if let Err(e) = op(sink) {
                log::warn!("Downstream sink failed to {}: {}", action, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl RecordSink for Downstream {
    // a failing sink never starves its siblings; the first error is returned
    fn set_header(&mut self, header: &RecordHeader) -> Result<()> {
        self.each("set header", |sink| sink.set_header(header))
    }

    fn write_record(&mut self, record: &[i32]) -> Result<()> {
        self.each("write record", |sink| sink.write_record(record))
    }

    fn close(&mut self) -> Result<()> {
        self.each("close", |sink| sink.close())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    state: StageState,
    headers: Vec<RecordHeader>,
    records: Vec<Vec<i32>>,
}

/// Keeps every header and record it receives.
///
/// Clones share storage, so one handle can sit in the pipeline while another
/// is read by a chart or a test.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Header currently in effect
    pub fn header(&self) -> Option<RecordHeader> {
        self.lock().headers.last().cloned()
    }

    /// Every header received, in order
    pub fn headers(&self) -> Vec<RecordHeader> {
        self.lock().headers.clone()
    }

    pub fn records(&self) -> Vec<Vec<i32>> {
        self.lock().records.clone()
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().state == StageState::Closed
    }
}

impl RecordSink for MemorySink {
    fn set_header(&mut self, header: &RecordHeader) -> Result<()> {
        let mut inner = self.lock();
        inner.state.configure()?;
        inner.headers.push(header.clone());
        Ok(())
    }

    fn write_record(&mut self, record: &[i32]) -> Result<()> {
        let mut inner = self.lock();
        inner.state.record_written()?;
        let expected = inner.headers.last().map(|h| h.record_size()).unwrap_or(0);
        if record.len() != expected {
            return Err(Error::config(format!(
                "record of {} samples does not match header record size {}",
                record.len(),
                expected
            )));
        }
        inner.records.push(record.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.lock().state.close();
        Ok(())
    }
}
