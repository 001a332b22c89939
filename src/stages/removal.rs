use std::collections::BTreeSet;
use std::ops::Range;
use crate::core::{Downstream, RecordHeader, RecordSink, StageState};
use crate::error::{Error, Result};

/// Drops channels from the record and header; survivors keep their order.
///
/// Used to strip helper channels (carrier, lead-off, battery) before storage.
pub struct ChannelRemovalStage {
    removed: BTreeSet<usize>,
    kept: Vec<Range<usize>>,
    input_size: usize,
    buffer: Vec<i32>,
    downstream: Downstream,
    state: StageState,
    layout: Option<RecordHeader>,
}

impl ChannelRemovalStage {
    pub fn new() -> Self {
        Self {
            removed: BTreeSet::new(),
            kept: Vec::new(),
            input_size: 0,
            buffer: Vec::new(),
            downstream: Downstream::new(),
            state: StageState::Unconfigured,
            layout: None,
        }
    }

    pub fn remove_channel(&mut self, channel: usize) -> Result<()> {
        if self.state != StageState::Unconfigured {
            return Err(Error::state("channels must be removed before the header is set"));
        }
        self.removed.insert(channel);
        Ok(())
    }

    pub fn add_sink(&mut self, sink: impl RecordSink + 'static) {
        self.downstream.push(sink);
    }

    pub fn add_boxed_sink(&mut self, sink: Box<dyn RecordSink>) {
        self.downstream.push_boxed(sink);
    }

    pub fn output_header(&self, input: &RecordHeader) -> RecordHeader {
        let mut output = input.clone();
        output.channels = input
            .channels
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.removed.contains(i))
            .map(|(_, spec)| spec.clone())
            .collect();
        output
    }
}

impl Default for ChannelRemovalStage {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordSink for ChannelRemovalStage {
    fn set_header(&mut self, header: &RecordHeader) -> Result<()> {
        header.validate()?;
        if let Some(&channel) = self.removed.iter().find(|&&c| c >= header.channel_count()) {
            return Err(Error::config(format!(
                "cannot remove channel {} from a header with {} channels",
                channel,
                header.channel_count()
            )));
        }
        if let Some(previous) = &self.layout {
            if !previous.same_layout(header) {
                return Err(Error::IncompatibleHeader(
                    "removal stage cannot change record layout after configuration".to_string(),
                ));
            }
            if self.state.records() > 0 && !previous.same_scaling(header) {
                return Err(Error::IncompatibleHeader(
                    "removal stage cannot rescale channels after records were written".to_string(),
                ));
            }
        }
        self.state.configure()?;

        // adjacent survivors collapse into one copy
        self.kept.clear();
        for channel in (0..header.channel_count()).filter(|c| !self.removed.contains(c)) {
            let range = header.channel_range(channel);
            match self.kept.last_mut() {
                Some(last) if last.end == range.start => last.end = range.end,
                _ => self.kept.push(range),
            }
        }
        let output = self.output_header(header);
        self.input_size = header.record_size();
        self.buffer.resize(output.record_size(), 0);
        self.layout = Some(header.clone());

        self.downstream.set_header(&output)
    }

    fn write_record(&mut self, record: &[i32]) -> Result<()> {
        self.state.record_written()?;
        if record.len() != self.input_size {
            return Err(Error::config(format!(
                "record of {} samples, expected {}",
                record.len(),
                self.input_size
            )));
        }
        if self.downstream.is_empty() {
            return Ok(());
        }

        let mut offset = 0;
        for range in &self.kept {
            let len = range.len();
            self.buffer[offset..offset + len].copy_from_slice(&record[range.clone()]);
            offset += len;
        }
        self.downstream.write_record(&self.buffer)
    }

    fn close(&mut self) -> Result<()> {
        if !self.state.close() {
            return Ok(());
        }
        self.downstream.close()
    }
}
