use std::collections::BTreeMap;
use std::ops::Range;
use crate::core::{Downstream, RecordHeader, RecordSink, StageState};
use crate::error::{Error, Result};

struct ChannelPlan {
    input: Range<usize>,
    output_offset: usize,
    divider: usize,
}

/// Reduces the sample rate of selected channels by averaging.
///
/// Each group of `divider` consecutive samples becomes one sample (integer
/// mean, truncated toward zero).
pub struct FrequencySubsamplingStage {
    dividers: BTreeMap<usize, usize>,
    plan: Vec<ChannelPlan>,
    input_size: usize,
    buffer: Vec<i32>,
    downstream: Downstream,
    state: StageState,
    layout: Option<RecordHeader>,
}

impl FrequencySubsamplingStage {
    pub fn new() -> Self {
        Self {
            dividers: BTreeMap::new(),
            plan: Vec::new(),
            input_size: 0,
            buffer: Vec::new(),
            downstream: Downstream::new(),
            state: StageState::Unconfigured,
            layout: None,
        }
    }

    pub fn set_divider(&mut self, channel: usize, divider: usize) -> Result<()> {
        if self.state != StageState::Unconfigured {
            return Err(Error::state("dividers must be set before the header is set"));
        }
        if divider == 0 {
            return Err(Error::config(format!("divider for channel {} must be positive", channel)));
        }
        self.dividers.insert(channel, divider);
        Ok(())
    }

    pub fn add_sink(&mut self, sink: impl RecordSink + 'static) {
        self.downstream.push(sink);
    }

    pub fn add_boxed_sink(&mut self, sink: Box<dyn RecordSink>) {
        self.downstream.push_boxed(sink);
    }

    /// Derive the reduced header; fails if any divider does not split its channel evenly
    pub fn output_header(&self, input: &RecordHeader) -> Result<RecordHeader> {
        let mut output = input.clone();
        for (&channel, &divider) in &self.dividers {
            let spec = output.channels.get_mut(channel).ok_or_else(|| {
                Error::config(format!(
                    "divider targets channel {} but the header has {} channels",
                    channel,
                    input.channel_count()
                ))
            })?;
            if spec.samples_per_record % divider != 0 {
                return Err(Error::config(format!(
                    "channel {} ({}) has {} samples per record, not divisible by {}",
                    channel, spec.label, spec.samples_per_record, divider
                )));
            }
            spec.samples_per_record /= divider;
        }
        Ok(output)
    }
}

impl Default for FrequencySubsamplingStage {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordSink for FrequencySubsamplingStage {
    fn set_header(&mut self, header: &RecordHeader) -> Result<()> {
        header.validate()?;
        // validated in full before any state changes
        let output = self.output_header(header)?;
        if let Some(previous) = &self.layout {
            if !previous.same_layout(header) {
                return Err(Error::IncompatibleHeader(
                    "subsampling stage cannot change record layout after configuration".to_string(),
                ));
            }
            if self.state.records() > 0 && !previous.same_scaling(header) {
                return Err(Error::IncompatibleHeader(
                    "subsampling stage cannot rescale channels after records were written".to_string(),
                ));
            }
        }
        self.state.configure()?;

        let output_offsets = output.channel_offsets();
        self.plan = (0..header.channel_count())
            .map(|channel| ChannelPlan {
                input: header.channel_range(channel),
                output_offset: output_offsets[channel],
                divider: self.dividers.get(&channel).copied().unwrap_or(1),
            })
            .collect();
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

        for plan in &self.plan {
            let input = &record[plan.input.clone()];
            if plan.divider == 1 {
                self.buffer[plan.output_offset..plan.output_offset + input.len()]
                    .copy_from_slice(input);
                continue;
            }
            for (k, group) in input.chunks_exact(plan.divider).enumerate() {
                let sum: i64 = group.iter().map(|&v| v as i64).sum();
                self.buffer[plan.output_offset + k] = (sum / plan.divider as i64) as i32;
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
