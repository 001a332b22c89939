use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use crate::core::{ChannelSpec, FileFormat, RecordHeader, RecordSink, StageState, UNKNOWN_RECORD_COUNT};
use crate::edf::codec;
use crate::error::{Error, Result};

struct WriterInner {
    file: Option<BufWriter<File>>,
    header: Option<RecordHeader>,
    state: StageState,
    header_written: bool,
    /// Index of the next channel block expected by `write_channel_block`
    next_channel: usize,
    samples_written: u64,
    saturated: u64,
    bytes: Vec<u8>,
}

impl WriterInner {
    fn header(&self) -> Result<&RecordHeader> {
        self.header
            .as_ref()
            .ok_or_else(|| Error::state("writer has no header"))
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.state {
            StageState::Closed => return Err(Error::state("writer is closed")),
            StageState::Unconfigured => return Err(Error::state("write before header was set")),
            _ => {}
        }
        if self.header()?.channels.is_empty() {
            return Err(Error::config("writer has no channels"));
        }
        Ok(())
    }

    fn file(&mut self) -> Result<&mut BufWriter<File>> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::state("writer file already released"))
    }

    /// Emit the header on first data, stamping the session start
    fn write_header_once(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        let encoded = {
            let header = self
                .header
                .as_mut()
                .ok_or_else(|| Error::state("writer has no header"))?;
            header
                .recording_start_ms
                .get_or_insert_with(|| chrono::Utc::now().timestamp_millis());
            codec::encode_header(header)
        };
        self.file()?.write_all(&encoded)?;
        self.header_written = true;
        Ok(())
    }

    fn encode_block(&mut self, spec: &ChannelSpec, format: FileFormat, samples: &[i32]) {
        let out_of_range = samples
            .iter()
            .filter(|&&v| v < spec.digital_min || v > spec.digital_max)
            .count();
        if out_of_range == 0 {
            codec::encode_samples(samples, format, &mut self.bytes);
            return;
        }
        self.saturated += out_of_range as u64;
        for &value in samples {
            codec::encode_samples(&[spec.clamp(value)], format, &mut self.bytes);
        }
    }

    fn flush_bytes(&mut self) -> Result<()> {
        let bytes = std::mem::take(&mut self.bytes);
        let result = self.file().and_then(|file| file.write_all(&bytes).map_err(Error::from));
        self.bytes = bytes;
        self.bytes.clear();
        result
    }

    fn write_record(&mut self, record: &[i32]) -> Result<()> {
        self.ensure_writable()?;
        let (channels, record_size) = {
            let header = self.header()?;
            (header.channel_count(), header.record_size())
        };
        if self.next_channel != 0 {
            return Err(Error::RecordIncomplete {
                written: self.next_channel,
                expected: channels,
            });
        }
        if record.len() != record_size {
            return Err(Error::config(format!(
                "record of {} samples, expected {}",
                record.len(),
                record_size
            )));
        }
        self.write_header_once()?;

        let header = self
            .header
            .take()
            .ok_or_else(|| Error::state("writer has no header"))?;
        self.bytes.clear();
        let mut offset = 0;
        for spec in &header.channels {
            let end = offset + spec.samples_per_record;
            self.encode_block(spec, header.format, &record[offset..end]);
            offset = end;
        }
        self.header = Some(header);

        self.flush_bytes()?;
        self.samples_written += record.len() as u64;
        self.state.record_written()
    }

    fn write_channel_block(&mut self, samples: &[i32]) -> Result<()> {
        self.ensure_writable()?;
        let expected = self.header()?.channels[self.next_channel].samples_per_record;
        if samples.len() != expected {
            return Err(Error::config(format!(
                "channel {} block of {} samples, expected {}",
                self.next_channel,
                samples.len(),
                expected
            )));
        }
        self.write_header_once()?;

        let header = self
            .header
            .take()
            .ok_or_else(|| Error::state("writer has no header"))?;
        self.bytes.clear();
        self.encode_block(&header.channels[self.next_channel], header.format, samples);
        let channels = header.channel_count();
        self.header = Some(header);

        self.flush_bytes()?;
        self.samples_written += samples.len() as u64;
        self.next_channel += 1;
        if self.next_channel == channels {
            self.next_channel = 0;
            self.state.record_written()?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if self.next_channel != 0 {
            log::warn!(
                "Closing writer with a partial record ({} channel blocks written)",
                self.next_channel
            );
        }
        if self.saturated > 0 {
            log::warn!("{} samples were saturated to their digital range", self.saturated);
        }

        if self.header.is_some() {
            let record_size = self.header()?.record_size() as u64;
            let records = if record_size == 0 {
                0
            } else {
                (self.samples_written / record_size) as i64
            };
            if let Some(header) = self.header.as_mut() {
                header.number_of_records = codec::record_count_field(records);
            }

            let header_written = self.header_written;
            if header_written {
                let encoded = codec::encode_header(self.header()?);
                let file = self.file()?;
                file.seek(SeekFrom::Start(0))?;
                file.write_all(&encoded)?;
            } else {
                // no data arrived: still leave a valid, empty file
                self.write_header_once()?;
            }
            log::info!("Finalized file with {} records", records);
        }

        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Terminal sink persisting records in the EDF/BDF layout.
///
/// Clones share the same file, so a producer thread can write through one
/// handle while another thread closes through a second one. `close` waits for
/// a write in flight to complete, and no write is accepted after it.
#[derive(Clone)]
pub struct EdfWriter {
    path: PathBuf,
    format: Option<FileFormat>,
    inner: Arc<Mutex<WriterInner>>,
}

impl EdfWriter {
    /// Create (truncate) the file at `path`; the header is written with the first data
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path.as_ref(), None)
    }

    /// Like [`create`](Self::create), but stores every header in `format`
    pub fn create_with_format(path: impl AsRef<Path>, format: FileFormat) -> Result<Self> {
        Self::open(path.as_ref(), Some(format))
    }

    fn open(path: &Path, format: Option<FileFormat>) -> Result<Self> {
        let path = path.to_path_buf();
        let file = File::create(&path)?;
        log::debug!("Created record file {:?}", path);

        Ok(Self {
            path,
            format,
            inner: Arc::new(Mutex::new(WriterInner {
                file: Some(BufWriter::new(file)),
                header: None,
                state: StageState::Unconfigured,
                header_written: false,
                next_channel: 0,
                samples_written: 0,
                saturated: 0,
                bytes: Vec::new(),
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, WriterInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header currently in effect
    pub fn header(&self) -> Option<RecordHeader> {
        self.lock().header.clone()
    }

    /// Complete records written so far
    pub fn records_written(&self) -> u64 {
        let inner = self.lock();
        match &inner.header {
            Some(header) if header.record_size() > 0 => {
                inner.samples_written / header.record_size() as u64
            }
            _ => 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().state == StageState::Closed
    }

    /// Adopt `header`, or validate it against the layout already in use
    pub fn configure(&self, header: &RecordHeader) -> Result<()> {
        let mut adopted = header.clone();
        if let Some(format) = self.format {
            adopted.format = format;
        }
        adopted.validate()?;
        let mut inner = self.lock();
        if inner.state == StageState::Closed {
            return Err(Error::state("writer is closed"));
        }
        if inner.next_channel != 0 {
            return Err(Error::RecordIncomplete {
                written: inner.next_channel,
                expected: header.channel_count(),
            });
        }

        if let Some(current) = &inner.header {
            if current.format != adopted.format {
                return Err(Error::IncompatibleHeader(format!(
                    "format changed from {:?} to {:?}",
                    current.format, adopted.format
                )));
            }
            if !current.same_layout(&adopted) {
                return Err(Error::IncompatibleHeader(
                    "channel count or samples per record changed".to_string(),
                ));
            }
            if inner.state.records() > 0 && !current.same_scaling(&adopted) {
                return Err(Error::IncompatibleHeader(
                    "channel ranges cannot change after records were written".to_string(),
                ));
            }
            if adopted.recording_start_ms.is_none() {
                adopted.recording_start_ms = current.recording_start_ms;
            }
            log::debug!("Writer header updated for {:?}", self.path);
        }
        adopted.number_of_records = UNKNOWN_RECORD_COUNT;
        inner.header = Some(adopted);
        inner.state.configure()?;
        Ok(())
    }

    /// Write one full record of digital values
    pub fn write_digital_record(&self, record: &[i32]) -> Result<()> {
        self.lock().write_record(record)
    }

    /// Write the next channel's block of digital values.
    ///
    /// Must be called once per channel, in channel order, to complete a record.
    pub fn write_channel_block(&self, samples: &[i32]) -> Result<()> {
        self.lock().write_channel_block(samples)
    }

    /// Write one full record of physical values
    pub fn write_physical_record(&self, record: &[f64]) -> Result<()> {
        let digital = {
            let inner = self.lock();
            inner.ensure_writable()?;
            let header = inner.header()?;
            if record.len() != header.record_size() {
                return Err(Error::config(format!(
                    "record of {} samples, expected {}",
                    record.len(),
                    header.record_size()
                )));
            }
            let mut digital = Vec::with_capacity(record.len());
            for (channel, spec) in header.channels.iter().enumerate() {
                digital.extend(
                    record[header.channel_range(channel)]
                        .iter()
                        .map(|&p| spec.physical_to_digital(p)),
                );
            }
            digital
        };
        self.write_digital_record(&digital)
    }

    /// Write the next channel's block of physical values
    pub fn write_physical_channel_block(&self, samples: &[f64]) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_writable()?;
        let spec = inner.header()?.channels[inner.next_channel].clone();
        let digital: Vec<i32> = samples.iter().map(|&p| spec.physical_to_digital(p)).collect();
        inner.write_channel_block(&digital)
    }

    /// Finalize: rewrite the header with the record count and release the file.
    ///
    /// Waits for a write in progress on another thread. A second call is a no-op.
    pub fn finish(&self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.state.close() {
            return Ok(());
        }
        inner.finalize()
    }
}

impl RecordSink for EdfWriter {
    fn set_header(&mut self, header: &RecordHeader) -> Result<()> {
        self.configure(header)
    }

    fn write_record(&mut self, record: &[i32]) -> Result<()> {
        self.write_digital_record(record)
    }

    fn close(&mut self) -> Result<()> {
        self.finish()
    }
}
