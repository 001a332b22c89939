use std::collections::BTreeMap;
use std::ops::Range;
use crate::core::{Downstream, RecordHeader, RecordSink, StageState};
use crate::error::{Error, Result};

/// Stateful integer filter applied sample by sample to one channel.
///
/// Filter algorithms are supplied by the caller; this crate only runs them.
pub trait SampleFilter: Send {
    /// Short name recorded in the channel's prefiltering label
    fn name(&self) -> &str;

    fn filter(&mut self, value: i32) -> i32;
}

struct FilterTarget {
    channel: usize,
    range: Range<usize>,
    offset: i64,
}

/// Runs an ordered filter chain over the samples of selected channels.
///
/// Samples are shifted by the channel's digital offset before filtering and
/// shifted back afterwards, so filters see values proportional to the
/// physical signal. Untouched channels are copied through in bulk.
pub struct SignalFilterStage {
    filters: BTreeMap<usize, Vec<Box<dyn SampleFilter>>>,
    targets: Vec<FilterTarget>,
    buffer: Vec<i32>,
    downstream: Downstream,
    state: StageState,
    layout: Option<RecordHeader>,
}

impl SignalFilterStage {
    pub fn new() -> Self {
        Self {
            filters: BTreeMap::new(),
            targets: Vec::new(),
            buffer: Vec::new(),
            downstream: Downstream::new(),
            state: StageState::Unconfigured,
            layout: None,
        }
    }

    /// Append `filter` to the chain of `channel`
    pub fn add_filter(&mut self, channel: usize, filter: impl SampleFilter + 'static) -> Result<()> {
        self.add_boxed_filter(channel, Box::new(filter))
    }

    pub fn add_boxed_filter(&mut self, channel: usize, filter: Box<dyn SampleFilter>) -> Result<()> {
        if self.state != StageState::Unconfigured {
            return Err(Error::state("filters must be added before the header is set"));
        }
        self.filters.entry(channel).or_default().push(filter);
        Ok(())
    }

    pub fn add_sink(&mut self, sink: impl RecordSink + 'static) {
        self.downstream.push(sink);
    }

    pub fn add_boxed_sink(&mut self, sink: Box<dyn RecordSink>) {
        self.downstream.push_boxed(sink);
    }

    /// Header as seen downstream: filter names appended to prefiltering labels
    pub fn output_header(&self, input: &RecordHeader) -> RecordHeader {
        let mut output = input.clone();
        for (&channel, chain) in &self.filters {
            if let Some(spec) = output.channels.get_mut(channel) {
                let names: Vec<&str> = chain.iter().map(|f| f.name()).collect();
                let joined = names.join(";");
                spec.prefiltering = if spec.prefiltering.is_empty() {
                    joined
                } else {
                    format!("{};{}", spec.prefiltering, joined)
                };
            }
        }
        output
    }
}

impl Default for SignalFilterStage {
    fn default() -> Self {
        Self::new()
    }
}

fn saturate(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

impl RecordSink for SignalFilterStage {
    fn set_header(&mut self, header: &RecordHeader) -> Result<()> {
        header.validate()?;
        if let Some(&channel) = self.filters.keys().find(|&&c| c >= header.channel_count()) {
            return Err(Error::config(format!(
                "filter targets channel {} but the header has {} channels",
                channel,
                header.channel_count()
            )));
        }
        if let Some(previous) = &self.layout {
            if !previous.same_layout(header) {
                return Err(Error::IncompatibleHeader(
                    "filter stage cannot change record layout after configuration".to_string(),
                ));
            }
            if self.state.records() > 0 && !previous.same_scaling(header) {
                return Err(Error::IncompatibleHeader(
                    "filter stage cannot rescale channels after records were written".to_string(),
                ));
            }
        }
        let mut targets = Vec::with_capacity(self.filters.len());
        for &channel in self.filters.keys() {
            let spec = &header.channels[channel];
            let offset = spec.offset().round();
            let lowest = spec.digital_min as f64 + offset;
            let highest = spec.digital_max as f64 + offset;
            if !offset.is_finite() || lowest < i32::MIN as f64 || highest > i32::MAX as f64 {
                return Err(Error::config(format!(
                    "channel {} offset {} moves samples outside the filter value range",
                    channel, offset
                )));
            }
            targets.push(FilterTarget {
                channel,
                range: header.channel_range(channel),
                offset: offset as i64,
            });
        }
        self.state.configure()?;
        self.targets = targets;
        self.buffer.resize(header.record_size(), 0);
        self.layout = Some(header.clone());

        self.downstream.set_header(&self.output_header(header))
    }

    fn write_record(&mut self, record: &[i32]) -> Result<()> {
        self.state.record_written()?;
        if record.len() != self.buffer.len() {
            return Err(Error::config(format!(
                "record of {} samples, expected {}",
                record.len(),
                self.buffer.len()
            )));
        }
        if self.downstream.is_empty() {
            return Ok(());
        }

        self.buffer.copy_from_slice(record);
        for target in &self.targets {
            let chain = match self.filters.get_mut(&target.channel) {
                Some(chain) => chain,
                None => continue,
            };
            for sample in &mut self.buffer[target.range.clone()] {
                let mut value = saturate(*sample as i64 + target.offset);
                for filter in chain.iter_mut() {
                    value = filter.filter(value);
                }
                *sample = saturate(value as i64 - target.offset);
            }
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
