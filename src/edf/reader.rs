use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use crate::core::{RecordHeader, UNKNOWN_RECORD_COUNT};
use crate::edf::codec;
use crate::error::{Error, Result};

/// Random-access reader for files produced by [`EdfWriter`](crate::edf::EdfWriter)
pub struct EdfReader {
    file: BufReader<File>,
    header: RecordHeader,
    data_offset: u64,
    record_count: u64,
}

impl EdfReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = BufReader::new(File::open(path.as_ref())?);

        let mut fixed = vec![0u8; codec::FIXED_HEADER_BYTES];
        file.read_exact(&mut fixed)?;
        let signals = codec::decode_signal_count(&fixed)?;
        let mut bytes = fixed;
        bytes.resize(codec::header_size(signals), 0);
        file.read_exact(&mut bytes[codec::FIXED_HEADER_BYTES..])?;
        let header = codec::decode_header(&bytes)?;

        let data_offset = bytes.len() as u64;
        let file_len = file.get_ref().metadata()?.len();
        let record_bytes = codec::record_bytes(&header) as u64;
        let record_count = if header.number_of_records != UNKNOWN_RECORD_COUNT {
            header.number_of_records as u64
        } else if record_bytes > 0 {
            // count unknown in the header: derive it from the data length
            file_len.saturating_sub(data_offset) / record_bytes
        } else {
            0
        };
        log::debug!(
            "Opened {:?}: {} signals, {} records",
            path.as_ref(),
            header.channel_count(),
            record_count
        );

        Ok(Self {
            file,
            header,
            data_offset,
            record_count,
        })
    }

    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Digital samples of record `index`, channel blocks in order
    pub fn read_record(&mut self, index: u64) -> Result<Vec<i32>> {
        if index >= self.record_count {
            return Err(Error::config(format!(
                "record {} out of range ({} records)",
                index, self.record_count
            )));
        }
        let record_bytes = codec::record_bytes(&self.header) as u64;
        self.file
            .seek(SeekFrom::Start(self.data_offset + index * record_bytes))?;
        let mut bytes = vec![0u8; record_bytes as usize];
        self.file.read_exact(&mut bytes)?;
        Ok(codec::decode_samples(&bytes, self.header.format))
    }

    /// Record `index` scaled to physical units
    pub fn read_physical_record(&mut self, index: u64) -> Result<Vec<f64>> {
        let digital = self.read_record(index)?;
        let mut physical = Vec::with_capacity(digital.len());
        let mut offset = 0;
        for spec in &self.header.channels {
            let end = offset + spec.samples_per_record;
            physical.extend(digital[offset..end].iter().map(|&d| spec.digital_to_physical(d)));
            offset = end;
        }
        Ok(physical)
    }

    /// Every record, in file order
    pub fn read_all(&mut self) -> Result<Vec<Vec<i32>>> {
        (0..self.record_count).map(|i| self.read_record(i)).collect()
    }
}
