use std::collections::HashMap;
use crate::config::RecorderConfig;
use crate::core::{Downstream, RecordSink};
use crate::edf::EdfWriter;
use crate::engine::adapter::{FrameAdapter, FrameLayout};
use crate::error::{Error, Result};
use crate::stages::{
    ChannelRemovalStage, FrequencySubsamplingStage, RecordJoinStage, SampleFilter,
    SignalFilterStage,
};

type FilterFactory = Box<dyn Fn() -> Box<dyn SampleFilter> + Send + Sync>;

/// Registry of available filter algorithms, by name
pub struct FilterRegistry {
    factories: HashMap<String, FilterFactory>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn SampleFilter> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn SampleFilter>> {
        self.factories
            .get(name)
            .ok_or_else(|| Error::config(format!("Unknown filter: {}", name)))
            .map(|factory| factory())
    }

    pub fn list_filters(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembled record chain
pub struct Pipeline {
    /// First sink of the chain; the adapter writes here
    pub head: Box<dyn RecordSink>,
    /// Handles to the file writers at the end of the chain
    pub writers: Vec<EdfWriter>,
    /// Layout the adapter will produce
    pub layout: FrameLayout,
}

/// Composes filter, subsampling, removal and join stages in front of the
/// configured file outputs. Stages with nothing to do are left out.
#[derive(Default)]
pub struct PipelineBuilder {
    monitors: Vec<Box<dyn RecordSink>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a sink that sees the unmodified adapter output (e.g. a chart)
    pub fn add_monitor(mut self, sink: impl RecordSink + 'static) -> Self {
        self.monitors.push(Box::new(sink));
        self
    }

    pub fn build(self, config: &RecorderConfig, registry: &FilterRegistry) -> Result<Pipeline> {
        let layout = FrameLayout::plan(&config.device, &config.adapter)?;
        let channels = layout.header.channel_count();
        let pipeline = &config.pipeline;
        for &channel in pipeline.filters.keys().chain(pipeline.dividers.keys()) {
            if channel >= channels {
                return Err(Error::config(format!(
                    "pipeline targets channel {} but the device provides {} channels",
                    channel, channels
                )));
            }
        }

        // built tail first: every stage takes ownership of its downstream
        let mut writers = Vec::new();
        let mut tail = Downstream::new();
        for output in &pipeline.outputs {
            let writer = EdfWriter::create_with_format(&output.path, output.format)?;
            tail.push(writer.clone());
            writers.push(writer);
        }

        let mut chain: Box<dyn RecordSink> = Box::new(tail);
        if pipeline.join_records != 1 {
            let mut join = RecordJoinStage::new(pipeline.join_records)?;
            join.add_boxed_sink(chain)?;
            chain = Box::new(join);
        }
        if pipeline.remove_helper_channels && !layout.helper_channels.is_empty() {
            let mut removal = ChannelRemovalStage::new();
            for &channel in &layout.helper_channels {
                removal.remove_channel(channel)?;
            }
            removal.add_boxed_sink(chain);
            chain = Box::new(removal);
        }
        if !pipeline.dividers.is_empty() {
            let mut subsample = FrequencySubsamplingStage::new();
            for (&channel, &divider) in &pipeline.dividers {
                subsample.set_divider(channel, divider)?;
            }
            subsample.add_boxed_sink(chain);
            chain = Box::new(subsample);
        }
        if !pipeline.filters.is_empty() {
            let mut filter = SignalFilterStage::new();
            for (&channel, names) in &pipeline.filters {
                for name in names {
                    filter.add_boxed_filter(channel, registry.create(name)?)?;
                }
            }
            filter.add_boxed_sink(chain);
            chain = Box::new(filter);
        }

        let head: Box<dyn RecordSink> = if self.monitors.is_empty() {
            chain
        } else {
            let mut fan_out = Downstream::new();
            fan_out.push_boxed(chain);
            for monitor in self.monitors {
                fan_out.push_boxed(monitor);
            }
            Box::new(fan_out)
        };

        log::debug!(
            "Pipeline built: {} channels in, {} outputs",
            channels,
            writers.len()
        );
        Ok(Pipeline {
            head,
            writers,
            layout,
        })
    }

    /// Build the chain and put a frame adapter in front of it
    pub fn build_adapter(
        self,
        config: &RecorderConfig,
        registry: &FilterRegistry,
    ) -> Result<(FrameAdapter, Vec<EdfWriter>)> {
        let pipeline = self.build(config, registry)?;
        let adapter = FrameAdapter::with_boxed_sink(
            config.device.clone(),
            config.adapter.clone(),
            pipeline.head,
        )
        .with_identity(
            config.recording.patient_id.clone(),
            config.recording.recording_id.clone(),
        );
        Ok((adapter, pipeline.writers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    impl SampleFilter for Passthrough {
        fn name(&self) -> &str {
            "passthrough"
        }

        fn filter(&mut self, value: i32) -> i32 {
            value
        }
    }

    #[test]
    fn test_registry_creates_registered_filters() {
        let mut registry = FilterRegistry::new();
        registry.register("passthrough", || Box::new(Passthrough));
        assert_eq!(registry.list_filters(), vec!["passthrough".to_string()]);

        let mut filter = registry.create("passthrough").unwrap();
        assert_eq!(filter.filter(42), 42);
        assert!(matches!(registry.create("notch"), Err(Error::InvalidConfiguration(_))));
    }
}
