//! Byte layout of the EDF/BDF header region and sample stream.
//!
//! The header is a 256-byte fixed block followed by 256 bytes per signal,
//! stored as parallel arrays of blank-padded ASCII slots. Samples are
//! little-endian two's complement, 2 bytes (EDF) or 3 bytes (BDF) wide.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use crate::core::{ChannelSpec, FileFormat, RecordHeader, UNKNOWN_RECORD_COUNT};
use crate::error::{Error, Result};

pub const FIXED_HEADER_BYTES: usize = 256;
pub const SIGNAL_HEADER_BYTES: usize = 256;

/// Largest record count the 8-digit slot can hold
pub const MAX_RECORD_COUNT: i64 = 99_999_999;

const BDF_VERSION: &[u8; 8] = b"\xffBIOSEMI";
const BDF_RESERVED: &str = "24BIT";

// fixed block: (offset, width)
const VERSION: (usize, usize) = (0, 8);
const PATIENT: (usize, usize) = (8, 80);
const RECORDING: (usize, usize) = (88, 80);
const START_DATE: (usize, usize) = (168, 8);
const START_TIME: (usize, usize) = (176, 8);
const HEADER_BYTES: (usize, usize) = (184, 8);
const RESERVED: (usize, usize) = (192, 44);
const RECORD_COUNT: (usize, usize) = (236, 8);
const RECORD_DURATION: (usize, usize) = (244, 8);
const SIGNAL_COUNT: (usize, usize) = (252, 4);

// per-signal slot widths, in on-disk order
const LABEL_WIDTH: usize = 16;
const TRANSDUCER_WIDTH: usize = 80;
const DIMENSION_WIDTH: usize = 8;
const NUMBER_WIDTH: usize = 8;
const PREFILTER_WIDTH: usize = 80;
const SIGNAL_RESERVED_WIDTH: usize = 32;

/// Total header bytes for `channels` signals
pub fn header_size(channels: usize) -> usize {
    FIXED_HEADER_BYTES + channels * SIGNAL_HEADER_BYTES
}

/// Bytes one record occupies on disk
pub fn record_bytes(header: &RecordHeader) -> usize {
    header.record_size() * header.format.sample_width()
}

/// Value for the record-count slot; counts that overflow it stay unknown
pub fn record_count_field(records: i64) -> i64 {
    if (0..=MAX_RECORD_COUNT).contains(&records) {
        records
    } else {
        UNKNOWN_RECORD_COUNT
    }
}

/// Shortest decimal text for `value` that fits in `width` characters
pub fn format_number(value: f64, width: usize) -> String {
    let plain = format!("{}", value);
    if plain.len() <= width {
        return plain;
    }
    let integral = format!("{:.0}", value);
    if integral.len() >= width {
        log::warn!("Value {} does not fit a {}-character header slot", value, width);
        return integral.chars().take(width).collect();
    }
    let decimals = width - integral.len() - 1;
    if decimals == 0 {
        return integral;
    }
    let text = format!("{:.*}", decimals, value);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn put_field(buf: &mut Vec<u8>, text: &str, width: usize) {
    let start = buf.len();
    buf.extend(
        text.chars()
            .map(|c| if c.is_ascii() && !c.is_ascii_control() { c as u8 } else { b'?' })
            .take(width),
    );
    buf.resize(start + width, b' ');
}

fn start_datetime(header: &RecordHeader) -> Option<NaiveDateTime> {
    let millis = header.recording_start_ms?;
    Local
        .timestamp_millis_opt(millis)
        .earliest()
        .map(|local| local.naive_local())
}

/// Serialize the full header region
pub fn encode_header(header: &RecordHeader) -> Vec<u8> {
    let channels = &header.channels;
    let mut buf = Vec::with_capacity(header_size(channels.len()));
    let start = start_datetime(header);

    match header.format {
        FileFormat::Edf => put_field(&mut buf, "0", VERSION.1),
        FileFormat::Bdf => buf.extend_from_slice(BDF_VERSION),
    }
    put_field(&mut buf, &header.patient_id, PATIENT.1);
    put_field(&mut buf, &header.recording_id, RECORDING.1);
    let (date, time) = match start {
        Some(start) => (
            format!("{:02}.{:02}.{:02}", start.day(), start.month(), start.year() % 100),
            format!("{:02}.{:02}.{:02}", start.hour(), start.minute(), start.second()),
        ),
        None => ("01.01.85".to_string(), "00.00.00".to_string()),
    };
    put_field(&mut buf, &date, START_DATE.1);
    put_field(&mut buf, &time, START_TIME.1);
    put_field(&mut buf, &header_size(channels.len()).to_string(), HEADER_BYTES.1);
    let reserved = match header.format {
        FileFormat::Edf => "",
        FileFormat::Bdf => BDF_RESERVED,
    };
    put_field(&mut buf, reserved, RESERVED.1);
    put_field(
        &mut buf,
        &record_count_field(header.number_of_records).to_string(),
        RECORD_COUNT.1,
    );
    put_field(
        &mut buf,
        &format_number(header.duration_of_record, RECORD_DURATION.1),
        RECORD_DURATION.1,
    );
    put_field(&mut buf, &channels.len().to_string(), SIGNAL_COUNT.1);

    for c in channels {
        put_field(&mut buf, &c.label, LABEL_WIDTH);
    }
    for c in channels {
        put_field(&mut buf, &c.transducer, TRANSDUCER_WIDTH);
    }
    for c in channels {
        put_field(&mut buf, &c.physical_dimension, DIMENSION_WIDTH);
    }
    for c in channels {
        put_field(&mut buf, &format_number(c.physical_min, NUMBER_WIDTH), NUMBER_WIDTH);
    }
    for c in channels {
        put_field(&mut buf, &format_number(c.physical_max, NUMBER_WIDTH), NUMBER_WIDTH);
    }
    for c in channels {
        put_field(&mut buf, &c.digital_min.to_string(), NUMBER_WIDTH);
    }
    for c in channels {
        put_field(&mut buf, &c.digital_max.to_string(), NUMBER_WIDTH);
    }
    for c in channels {
        put_field(&mut buf, &c.prefiltering, PREFILTER_WIDTH);
    }
    for c in channels {
        put_field(&mut buf, &c.samples_per_record.to_string(), NUMBER_WIDTH);
    }
    for _ in channels {
        put_field(&mut buf, "", SIGNAL_RESERVED_WIDTH);
    }

    buf
}

fn field_text(bytes: &[u8], (offset, width): (usize, usize)) -> String {
    String::from_utf8_lossy(&bytes[offset..offset + width]).trim().to_string()
}

fn parse_field<T: std::str::FromStr>(text: &str, name: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| Error::config(format!("malformed header field {}: {:?}", name, text)))
}

/// Number of signals declared in a fixed header block
pub fn decode_signal_count(fixed: &[u8]) -> Result<usize> {
    if fixed.len() < FIXED_HEADER_BYTES {
        return Err(Error::config("header shorter than the fixed 256-byte block"));
    }
    parse_field(&field_text(fixed, SIGNAL_COUNT), "signal count")
}

fn decode_start(date: &str, time: &str) -> Option<i64> {
    let mut d = date.split('.').map(|p| p.parse::<u32>());
    let mut t = time.split('.').map(|p| p.parse::<u32>());
    let (day, month, yy) = (d.next()?.ok()?, d.next()?.ok()?, d.next()?.ok()?);
    let (hour, minute, second) = (t.next()?.ok()?, t.next()?.ok()?, t.next()?.ok()?);
    // two-digit years: 85..99 are 19xx
    let year = if yy >= 85 { 1900 + yy } else { 2000 + yy };
    let naive = NaiveDate::from_ymd_opt(year as i32, month, day)?.and_hms_opt(hour, minute, second)?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.timestamp_millis())
}

/// Parse a full header region back into a [`RecordHeader`]
pub fn decode_header(bytes: &[u8]) -> Result<RecordHeader> {
    let count = decode_signal_count(bytes)?;
    if bytes.len() < header_size(count) {
        return Err(Error::config(format!(
            "header of {} bytes is too short for {} signals",
            bytes.len(),
            count
        )));
    }

    let format = if bytes[0] == 0xff { FileFormat::Bdf } else { FileFormat::Edf };
    let mut header = RecordHeader::new(
        format,
        parse_field(&field_text(bytes, RECORD_DURATION), "record duration")?,
    );
    header.patient_id = field_text(bytes, PATIENT);
    header.recording_id = field_text(bytes, RECORDING);
    header.recording_start_ms = decode_start(&field_text(bytes, START_DATE), &field_text(bytes, START_TIME));
    header.number_of_records = parse_field(&field_text(bytes, RECORD_COUNT), "record count")?;

    let signals = &bytes[FIXED_HEADER_BYTES..header_size(count)];
    let mut offset = 0;
    let mut column = |width: usize| -> Vec<String> {
        let values = (0..count)
            .map(|i| field_text(signals, (offset + i * width, width)))
            .collect();
        offset += count * width;
        values
    };
    let labels = column(LABEL_WIDTH);
    let transducers = column(TRANSDUCER_WIDTH);
    let dimensions = column(DIMENSION_WIDTH);
    let physical_mins = column(NUMBER_WIDTH);
    let physical_maxs = column(NUMBER_WIDTH);
    let digital_mins = column(NUMBER_WIDTH);
    let digital_maxs = column(NUMBER_WIDTH);
    let prefilters = column(PREFILTER_WIDTH);
    let samples = column(NUMBER_WIDTH);

    for i in 0..count {
        header.channels.push(ChannelSpec {
            label: labels[i].clone(),
            transducer: transducers[i].clone(),
            physical_dimension: dimensions[i].clone(),
            physical_min: parse_field(&physical_mins[i], "physical minimum")?,
            physical_max: parse_field(&physical_maxs[i], "physical maximum")?,
            digital_min: parse_field(&digital_mins[i], "digital minimum")?,
            digital_max: parse_field(&digital_maxs[i], "digital maximum")?,
            prefiltering: prefilters[i].clone(),
            samples_per_record: parse_field(&samples[i], "samples per record")?,
        });
    }
    Ok(header)
}

/// Append `samples` to `out` in the encoding of `format`
pub fn encode_samples(samples: &[i32], format: FileFormat, out: &mut Vec<u8>) {
    let width = format.sample_width();
    let start = out.len();
    out.resize(start + samples.len() * width, 0);
    for (chunk, &value) in out[start..].chunks_exact_mut(width).zip(samples) {
        match format {
            FileFormat::Edf => LittleEndian::write_i16(chunk, value as i16),
            FileFormat::Bdf => LittleEndian::write_i24(chunk, value),
        }
    }
}

/// Decode every sample in `bytes`
pub fn decode_samples(bytes: &[u8], format: FileFormat) -> Vec<i32> {
    bytes
        .chunks_exact(format.sample_width())
        .map(|chunk| match format {
            FileFormat::Edf => LittleEndian::read_i16(chunk) as i32,
            FileFormat::Bdf => LittleEndian::read_i24(chunk),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(format: FileFormat) -> RecordHeader {
        let mut header = RecordHeader::new(format, 0.5)
            .with_channel(
                ChannelSpec::new("EEG Fp1", 250)
                    .with_physical_range(-3276.8, 3276.7)
                    .with_digital_range(-32768, 32767)
                    .with_dimension("uV")
                    .with_prefiltering("HP:0.1Hz"),
            )
            .with_channel(ChannelSpec::new("Battery", 1).with_physical_range(0.0, 100.0).with_digital_range(0, 100));
        header.patient_id = "X".to_string();
        header.recording_start_ms = Some(1_700_000_000_000);
        header
    }

    #[test]
    fn test_header_size_and_offsets() {
        let bytes = encode_header(&header(FileFormat::Edf));
        assert_eq!(bytes.len(), 768);
        assert_eq!(&bytes[0..8], b"0       ");
        assert_eq!(&bytes[184..192], b"768     ");
        assert_eq!(&bytes[236..244], b"-1      ");
        assert_eq!(&bytes[244..252], b"0.5     ");
        assert_eq!(&bytes[252..256], b"2   ");
        assert_eq!(&bytes[256..272], b"EEG Fp1         ");
    }

    #[test]
    fn test_bdf_markers() {
        let bytes = encode_header(&header(FileFormat::Bdf));
        assert_eq!(bytes[0], 0xff);
        assert_eq!(&bytes[1..8], b"BIOSEMI");
        assert_eq!(&bytes[192..197], b"24BIT");
    }

    #[test]
    fn test_header_decode_matches() {
        let original = header(FileFormat::Bdf);
        let decoded = decode_header(&encode_header(&original)).unwrap();
        assert_eq!(decoded.format, FileFormat::Bdf);
        assert_eq!(decoded.channels, original.channels);
        assert_eq!(decoded.duration_of_record, 0.5);
        assert_eq!(decoded.patient_id, "X");
        // the date slots carry whole seconds
        assert_eq!(decoded.recording_start_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn test_record_count_overflow_stays_unknown() {
        assert_eq!(record_count_field(99_999_999), 99_999_999);
        assert_eq!(record_count_field(100_000_000), UNKNOWN_RECORD_COUNT);
    }

    #[test]
    fn test_format_number_fits_slot() {
        assert_eq!(format_number(1.0, 8), "1");
        assert_eq!(format_number(-3276.8, 8), "-3276.8");
        assert_eq!(format_number(0.1234567891, 8), "0.123457");
        assert_eq!(format_number(1.0 / 3.0, 8), "0.333333");
    }

    #[test]
    fn test_format_number_keeps_integer_digits() {
        assert_eq!(format_number(1000000.4, 8), "1000000");
        assert_eq!(format_number(1234560.4, 8), "1234560");
        assert_eq!(format_number(-100000.25, 8), "-100000");
    }

    #[test]
    fn test_sample_encoding_little_endian() {
        let mut out = Vec::new();
        encode_samples(&[1, -2], FileFormat::Bdf, &mut out);
        assert_eq!(out, vec![0x01, 0x00, 0x00, 0xfe, 0xff, 0xff]);
        assert_eq!(decode_samples(&out, FileFormat::Bdf), vec![1, -2]);

        out.clear();
        encode_samples(&[0x1234], FileFormat::Edf, &mut out);
        assert_eq!(out, vec![0x34, 0x12]);
    }
}
