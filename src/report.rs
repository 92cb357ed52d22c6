//! Binary persistence of a finished run and gathering of shard reports.
//!
//! A report is a fixed 64-byte [`ReportHeader`] followed by a body holding, in
//! order: the run arguments, the covariate descriptors, the read group names in
//! identifier order, the quantization table and the rows of every table. All
//! integers are little-endian. The body is zstd compressed unless the header
//! says otherwise.
//!
//! Rows store the raw fixed-point accumulators of each cell, so a reloaded
//! report merges exactly like the in-memory tables it was written from.

use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use anyhow::{bail, ensure};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use bytemuck::{Pod, Zeroable};
use log::debug;
use memmap2::Mmap;
use zstd::stream::{copy_decode, copy_encode};

use crate::config::RecalibrationArgs;
use crate::covariate::CovariateKind;
use crate::datum::RecalDatum;
use crate::error::{Error, ReportError, Result};
use crate::quality::QUALITY_BUCKETS;
use crate::quantize::QuantizationInfo;
use crate::read::Platform;
use crate::tables::RecalibrationTables;

pub const REPORT_MAGIC: &[u8; 7] = b"BQSRRPT";
pub const REPORT_VERSION: u8 = 1;
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 0;

/// Upper bound on the decompressed size reserved ahead of decoding, as a
/// multiple of the stored body size
const MAX_PREALLOCATED_RATIO: usize = 16;

/// The report body is zstd compressed
pub const FLAG_COMPRESSED: u64 = 1 << 0;

/// The report body was produced by combining shard reports
pub const FLAG_MERGED: u64 = 1 << 1;

/// The header of a report.
///
/// This is stored identically in memory and on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct ReportHeader {
    // Report Type Metadata (8 bytes)
    /// Report magic number
    magic: [u8; 7],
    /// Report format version
    pub version: u8,

    /// Bitfield of `FLAG_*` values
    pub flags: u64,

    /// Number of tables in the body
    pub num_tables: u64,

    /// Total number of rows over all tables
    pub num_rows: u64,

    /// Number of bytes in the uncompressed body
    pub u_bytes: u64,

    /// Number of bytes of the body as stored
    pub z_bytes: u64,

    /// Reserved for future use
    reserved: [u8; 16],
}
impl ReportHeader {
    #[must_use]
    pub fn new(flags: u64, num_tables: u64, num_rows: u64, u_bytes: u64, z_bytes: u64) -> Self {
        Self {
            magic: *REPORT_MAGIC,
            version: REPORT_VERSION,
            flags,
            num_tables,
            num_rows,
            u_bytes,
            z_bytes,
            reserved: [0; 16],
        }
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.flags & FLAG_MERGED != 0
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < size_of::<Self>() {
            return Err(ReportError::Truncated(bytes.len()).into());
        }
        let header: Self = bytemuck::pod_read_unaligned(&bytes[..size_of::<Self>()]);
        header.validate().map_err(into_report_error)?;
        Ok(header)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.magic != *REPORT_MAGIC {
            bail!(ReportError::InvalidMagic)
        }
        if self.version != REPORT_VERSION {
            bail!(ReportError::UnsupportedVersion(self.version))
        }
        ensure!(
            self.is_compressed() || self.u_bytes == self.z_bytes,
            "uncompressed body declares {} bytes but stores {}",
            self.u_bytes,
            self.z_bytes
        );
        Ok(())
    }
}

/// Recovers the typed report error carried by a header check
fn into_report_error(error: anyhow::Error) -> Error {
    match error.downcast::<ReportError>() {
        Ok(error) => error.into(),
        Err(other) => Error::GenericError(other.into()),
    }
}

/// Sequential little-endian reader over a decoded body
struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}
impl<'a> BodyReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(ReportError::Truncated(self.buf.len()).into());
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    fn usize(&mut self) -> Result<usize> {
        Ok(self.u64()? as usize)
    }

    fn u128(&mut self) -> Result<u128> {
        Ok(LittleEndian::read_u128(self.take(16)?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        Ok(String::from_utf8(self.take(len)?.to_vec())?)
    }

    fn option_u8(&mut self) -> Result<Option<u8>> {
        let present = self.bool()?;
        let value = self.u8()?;
        Ok(present.then_some(value))
    }

    fn option_string(&mut self) -> Result<Option<String>> {
        if self.bool()? {
            Ok(Some(self.string()?))
        } else {
            Ok(None)
        }
    }

    fn option_platform(&mut self) -> Result<Option<Platform>> {
        match self.option_string()? {
            Some(name) => Ok(Some(name.parse()?)),
            None => Ok(None),
        }
    }
}

fn write_string(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    buf.write_u32::<LittleEndian>(value.len() as u32)?;
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

fn write_option_string(buf: &mut Vec<u8>, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) => {
            buf.write_u8(1)?;
            write_string(buf, value)
        }
        None => Ok(buf.write_u8(0)?),
    }
}

fn write_option_u8(buf: &mut Vec<u8>, value: Option<u8>) -> Result<()> {
    buf.write_u8(u8::from(value.is_some()))?;
    buf.write_u8(value.unwrap_or(0))?;
    Ok(())
}

fn write_args(buf: &mut Vec<u8>, args: &RecalibrationArgs) -> Result<()> {
    buf.write_u32::<LittleEndian>(args.covariates.len() as u32)?;
    for name in &args.covariates {
        write_string(buf, name)?;
    }
    buf.write_u8(u8::from(args.use_standard_covariates))?;
    buf.write_u64::<LittleEndian>(args.mismatches_context_size as u64)?;
    buf.write_u64::<LittleEndian>(args.indels_context_size as u64)?;
    buf.write_u64::<LittleEndian>(args.maximum_cycle_value as u64)?;
    write_option_u8(buf, args.mismatches_default_quality)?;
    buf.write_u8(args.insertions_default_quality)?;
    buf.write_u8(args.deletions_default_quality)?;
    buf.write_u8(args.low_quality_tail)?;
    buf.write_u64::<LittleEndian>(args.quantizing_levels as u64)?;
    write_option_string(buf, args.binary_tag_name.as_deref())?;
    write_option_string(buf, args.default_platform.map(Platform::as_str))?;
    write_option_string(buf, args.force_platform.map(Platform::as_str))?;
    buf.write_u8(args.preserve_qscores_less_than)?;
    buf.write_u64::<LittleEndian>(args.num_threads as u64)?;
    Ok(())
}

fn read_args(reader: &mut BodyReader<'_>) -> Result<RecalibrationArgs> {
    let num_covariates = reader.u32()? as usize;
    let covariates = (0..num_covariates)
        .map(|_| reader.string())
        .collect::<Result<Vec<_>>>()?;
    Ok(RecalibrationArgs {
        covariates,
        use_standard_covariates: reader.bool()?,
        mismatches_context_size: reader.usize()?,
        indels_context_size: reader.usize()?,
        maximum_cycle_value: reader.usize()?,
        mismatches_default_quality: reader.option_u8()?,
        insertions_default_quality: reader.u8()?,
        deletions_default_quality: reader.u8()?,
        low_quality_tail: reader.u8()?,
        quantizing_levels: reader.usize()?,
        binary_tag_name: reader.option_string()?,
        default_platform: reader.option_platform()?,
        force_platform: reader.option_platform()?,
        preserve_qscores_less_than: reader.u8()?,
        num_threads: reader.usize()?,
    })
}

fn write_kinds(buf: &mut Vec<u8>, kinds: &[CovariateKind]) -> Result<()> {
    buf.write_u8(kinds.len() as u8)?;
    for kind in kinds {
        buf.write_u8(kind.id())?;
    }
    Ok(())
}

fn read_kinds(reader: &mut BodyReader<'_>) -> Result<Vec<CovariateKind>> {
    let len = reader.u8()?;
    (0..len)
        .map(|_| -> Result<CovariateKind> {
            let id = reader.u8()?;
            Ok(CovariateKind::from_id(id).ok_or(ReportError::UnknownCovariateKind(id))?)
        })
        .collect()
}

fn describe(kinds: &[CovariateKind]) -> String {
    kinds
        .iter()
        .map(|kind| kind.name())
        .collect::<Vec<_>>()
        .join(",")
}

/// The outcome of a recalibration run: its arguments, quantization map and tables
#[derive(Debug)]
pub struct RecalibrationReport {
    args: RecalibrationArgs,
    quantization: QuantizationInfo,
    tables: RecalibrationTables,
    merged: bool,
}
impl RecalibrationReport {
    #[must_use]
    pub fn new(
        args: RecalibrationArgs,
        quantization: QuantizationInfo,
        tables: RecalibrationTables,
    ) -> Self {
        Self {
            args,
            quantization,
            tables,
            merged: false,
        }
    }

    #[must_use]
    pub fn args(&self) -> &RecalibrationArgs {
        &self.args
    }

    #[must_use]
    pub fn quantization(&self) -> &QuantizationInfo {
        &self.quantization
    }

    #[must_use]
    pub fn tables(&self) -> &RecalibrationTables {
        &self.tables
    }

    /// Whether the report combines more than one shard
    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.merged
    }

    #[must_use]
    pub fn into_parts(self) -> (RecalibrationArgs, QuantizationInfo, RecalibrationTables) {
        (self.args, self.quantization, self.tables)
    }

    /// Recomputes the quantization map from the current tables
    pub fn requantize(&mut self) {
        self.quantization = QuantizationInfo::new(&self.tables, self.args.quantizing_levels);
    }

    /// Folds the tables of `other` into this report and requantizes
    ///
    /// # Errors
    /// [`crate::error::MergeError`] if the reports were built with different covariates.
    pub fn combine(&mut self, other: &Self) -> Result<()> {
        self.tables.merge(&other.tables)?;
        self.merged = true;
        self.requantize();
        Ok(())
    }

    /// Combines any number of shard reports into one
    ///
    /// The tables are tree-reduced and quantized once at the end; the
    /// arguments of the first report are kept. Returns `None` for no reports.
    pub fn gather(reports: Vec<Self>) -> Result<Option<Self>> {
        let num_reports = reports.len();
        let mut args = None;
        let shards: Vec<RecalibrationTables> = reports
            .into_iter()
            .map(|report| {
                let (report_args, _, tables) = report.into_parts();
                if args.is_none() {
                    args = Some(report_args);
                }
                tables
            })
            .collect();
        let (Some(args), Some(tables)) = (args, RecalibrationTables::merge_all(shards)?) else {
            return Ok(None);
        };
        debug!("Gathered {num_reports} reports");
        let mut report = Self::new(args, QuantizationInfo::no_quantization(), tables);
        report.merged = num_reports > 1;
        report.requantize();
        Ok(Some(report))
    }

    fn encode_body(&self) -> Result<(Vec<u8>, u64)> {
        let mut body = Vec::new();
        write_args(&mut body, &self.args)?;

        let codec = self.tables.full_codec();
        write_kinds(&mut body, &codec.required_kinds().collect::<Vec<_>>())?;
        write_kinds(&mut body, &codec.optional_kinds().collect::<Vec<_>>())?;

        let names = self.tables.read_group_covariate().names();
        body.write_u32::<LittleEndian>(names.len() as u32)?;
        for name in &names {
            write_string(&mut body, name)?;
        }

        body.write_u64::<LittleEndian>(self.quantization.levels() as u64)?;
        body.write_u32::<LittleEndian>(self.quantization.quantized().len() as u32)?;
        body.extend_from_slice(self.quantization.quantized());
        for count in self.quantization.counts() {
            body.write_u64::<LittleEndian>(*count)?;
        }

        let mut num_rows = 0;
        body.write_u32::<LittleEndian>(self.tables.num_tables() as u32)?;
        for index in 0..self.tables.num_tables() {
            let cells = self.tables.table(index).snapshot();
            body.write_u64::<LittleEndian>(cells.len() as u64)?;
            for (key, datum) in &cells {
                body.write_u64::<LittleEndian>(*key)?;
                body.write_u64::<LittleEndian>(datum.observations())?;
                body.write_u128::<LittleEndian>(datum.errors_fixed())?;
                body.write_u128::<LittleEndian>(datum.expected_errors_fixed())?;
                body.write_f64::<LittleEndian>(datum.estimated_reported_quality())?;
            }
            num_rows += cells.len() as u64;
        }
        Ok((body, num_rows))
    }

    /// Writes the report with the default compression level
    pub fn write<W: Write>(&self, writer: W) -> Result<()> {
        self.write_with_level(writer, Some(DEFAULT_COMPRESSION_LEVEL))
    }

    /// Writes the report, compressing the body at `level` or storing it raw for `None`
    pub fn write_with_level<W: Write>(&self, mut writer: W, level: Option<i32>) -> Result<()> {
        let (body, num_rows) = self.encode_body()?;
        let mut flags = if self.merged { FLAG_MERGED } else { 0 };
        let stored = match level {
            Some(level) => {
                flags |= FLAG_COMPRESSED;
                let mut encoded = Vec::default();
                copy_encode(body.as_slice(), &mut encoded, level)?;
                encoded
            }
            None => body.clone(),
        };
        let header = ReportHeader::new(
            flags,
            self.tables.num_tables() as u64,
            num_rows,
            body.len() as u64,
            stored.len() as u64,
        );
        writer.write_all(header.as_bytes())?;
        writer.write_all(&stored)?;
        writer.flush()?;
        debug!(
            "Wrote report with {num_rows} rows ({} bytes, {} stored)",
            body.len(),
            stored.len()
        );
        Ok(())
    }

    pub fn write_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = fs::File::create(path)?;
        self.write(BufWriter::new(file))
    }

    /// Reads a report from any reader
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Reads a report by memory-mapping the file at `path`
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = fs::File::open(path)?;

        // Load the mmap
        let inner = unsafe { Mmap::map(&file) }?;
        Self::from_bytes(&inner)
    }

    /// Parses a report from its full byte representation
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = ReportHeader::from_bytes(bytes)?;
        let stored = &bytes[size_of::<ReportHeader>()..];
        if (stored.len() as u64) < header.z_bytes {
            return Err(ReportError::Truncated(bytes.len()).into());
        }
        let stored = &stored[..header.z_bytes as usize];

        let body = if header.is_compressed() {
            // the declared length is untrusted until the body is decoded
            let capacity = usize::try_from(header.u_bytes)
                .unwrap_or(usize::MAX)
                .min(stored.len().saturating_mul(MAX_PREALLOCATED_RATIO));
            let mut body = Vec::with_capacity(capacity);
            copy_decode(stored, &mut body)?;
            body
        } else {
            stored.to_vec()
        };
        if (body.len() as u64) < header.u_bytes {
            return Err(ReportError::Truncated(body.len()).into());
        }

        let mut report = Self::decode_body(&body)?;
        report.merged = header.is_merged();
        debug!(
            "Read report with {} tables and {} rows",
            header.num_tables, header.num_rows
        );
        Ok(report)
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        let mut reader = BodyReader::new(body);
        let args = read_args(&mut reader)?;
        let tables = RecalibrationTables::new(&args)?;

        let required = read_kinds(&mut reader)?;
        let optional = read_kinds(&mut reader)?;
        let codec = tables.full_codec();
        if !codec.required_kinds().eq(required.iter().copied())
            || !codec.optional_kinds().eq(optional.iter().copied())
        {
            let stored: Vec<CovariateKind> = required.into_iter().chain(optional).collect();
            return Err(ReportError::CovariateMismatch {
                expected: codec.describe(),
                found: describe(&stored),
            }
            .into());
        }

        // interning in stored order restores the stored identifiers
        let read_groups = tables.read_group_covariate();
        let num_names = reader.u32()?;
        for _ in 0..num_names {
            let name = reader.string()?;
            read_groups.id_for(&name);
        }

        let levels = reader.usize()?;
        let num_buckets = reader.u32()? as usize;
        if num_buckets != QUALITY_BUCKETS {
            return Err(ReportError::InvalidQuantizationTable {
                expected: QUALITY_BUCKETS,
                found: num_buckets,
            }
            .into());
        }
        let quantized = reader.take(num_buckets)?.to_vec();
        let counts = (0..num_buckets)
            .map(|_| reader.u64())
            .collect::<Result<Vec<u64>>>()?;
        let quantization = QuantizationInfo::from_parts(quantized, counts, levels);

        let num_tables = reader.u32()? as usize;
        if num_tables != tables.num_tables() {
            return Err(ReportError::CovariateMismatch {
                expected: format!("{} tables", tables.num_tables()),
                found: format!("{num_tables} tables"),
            }
            .into());
        }
        for index in 0..num_tables {
            let num_rows = reader.u64()?;
            for _ in 0..num_rows {
                let key = reader.u64()?;
                let observations = reader.u64()?;
                let errors = reader.u128()?;
                let expected_errors = reader.u128()?;
                let reported_quality = reader.f64()?;
                if tables.codec(index).decode(key).is_none() {
                    return Err(ReportError::InvalidKey { table: index, key }.into());
                }
                tables.table(index).insert(
                    key,
                    RecalDatum::from_raw(observations, errors, expected_errors, reported_quality),
                );
            }
        }

        Ok(Self {
            args,
            quantization,
            tables,
            merged: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::engine::RecalibrationEngine;
    use crate::error::{Error, MergeError};
    use crate::read::ReadObservation;

    fn report(read_groups: &[&str], args: RecalibrationArgs) -> RecalibrationReport {
        let engine = RecalibrationEngine::new(args).unwrap();
        for (i, rg) in read_groups.iter().enumerate() {
            let mut mismatches = vec![false; 16];
            mismatches[i % 16] = true;
            let observation =
                ReadObservation::builder(*rg, b"ACGTTGCAACGTTGCA".to_vec(), vec![20 + i as u8; 16])
                    .platform(Platform::Illumina)
                    .mismatches(&mismatches)
                    .build()
                    .unwrap();
            engine.update(&observation);
        }
        engine.into_report()
    }

    fn default_report() -> RecalibrationReport {
        report(&["rg1", "rg2", "rg1", "rg3"], RecalibrationArgs::default())
    }

    fn round_trip(report: &RecalibrationReport) -> RecalibrationReport {
        let mut buffer = Vec::new();
        report.write(&mut buffer).unwrap();
        RecalibrationReport::from_reader(Cursor::new(buffer)).unwrap()
    }

    // ==================== Header Tests ====================

    #[test]
    fn test_header_size() {
        assert_eq!(size_of::<ReportHeader>(), 64);
    }

    #[test]
    fn test_header_bytes() {
        let header = ReportHeader::new(FLAG_COMPRESSED, 4, 100, 2048, 512);
        let parsed = ReportHeader::from_bytes(header.as_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert!(parsed.is_compressed());
        assert!(!parsed.is_merged());
    }

    #[test]
    fn test_header_invalid_magic() {
        let header = ReportHeader::new(0, 4, 0, 0, 0);
        let mut bytes = header.as_bytes().to_vec();
        bytes[0] = b'X';
        assert!(matches!(
            ReportHeader::from_bytes(&bytes),
            Err(Error::ReportError(ReportError::InvalidMagic))
        ));
    }

    #[test]
    fn test_header_unsupported_version() {
        let header = ReportHeader::new(0, 4, 0, 0, 0);
        let mut bytes = header.as_bytes().to_vec();
        bytes[7] = REPORT_VERSION + 1;
        assert!(matches!(
            ReportHeader::from_bytes(&bytes),
            Err(Error::ReportError(ReportError::UnsupportedVersion(v))) if v == REPORT_VERSION + 1
        ));
    }

    #[test]
    fn test_header_inconsistent_lengths() {
        let header = ReportHeader::new(0, 4, 0, 10, 20);
        assert!(matches!(
            ReportHeader::from_bytes(header.as_bytes()),
            Err(Error::GenericError(_))
        ));
    }

    #[test]
    fn test_header_truncated() {
        assert!(matches!(
            ReportHeader::from_bytes(&[0u8; 10]),
            Err(Error::ReportError(ReportError::Truncated(10)))
        ));
    }

    // ==================== Round-trip Tests ====================

    #[test]
    fn test_round_trip_preserves_tables() {
        let original = default_report();
        let reloaded = round_trip(&original);
        assert_eq!(reloaded.args(), original.args());
        assert_eq!(reloaded.quantization(), original.quantization());
        assert_eq!(reloaded.tables().rows(), original.tables().rows());
        assert_eq!(
            reloaded.tables().read_group_covariate().names(),
            original.tables().read_group_covariate().names()
        );
    }

    #[test]
    fn test_round_trip_uncompressed() {
        let original = default_report();
        let mut buffer = Vec::new();
        original.write_with_level(&mut buffer, None).unwrap();
        let header = ReportHeader::from_bytes(&buffer).unwrap();
        assert!(!header.is_compressed());
        let reloaded = RecalibrationReport::from_bytes(&buffer).unwrap();
        assert_eq!(reloaded.tables().rows(), original.tables().rows());
    }

    #[test]
    fn test_round_trip_args() {
        let args = RecalibrationArgs::default()
            .covariates(["BinaryTag"])
            .binary_tag_name("XB")
            .mismatches_default_quality(Some(33))
            .default_platform(Platform::IonTorrent)
            .force_platform(Platform::Illumina)
            .quantizing_levels(4)
            .num_threads(3);
        let original = report(&["a"], args.clone());
        let reloaded = round_trip(&original);
        assert_eq!(reloaded.args(), &args);
    }

    #[test]
    fn test_file_round_trip() {
        let original = default_report();
        let file = tempfile::NamedTempFile::new().unwrap();
        original.write_path(file.path()).unwrap();
        let reloaded = RecalibrationReport::from_path(file.path()).unwrap();
        assert_eq!(reloaded.tables().rows(), original.tables().rows());
    }

    #[test]
    fn test_truncated_body() {
        let mut buffer = Vec::new();
        default_report().write(&mut buffer).unwrap();
        buffer.truncate(buffer.len() - 8);
        assert!(matches!(
            RecalibrationReport::from_bytes(&buffer),
            Err(Error::ReportError(ReportError::Truncated(_)))
        ));
    }

    #[test]
    fn test_oversized_declared_body() {
        let header = ReportHeader::new(FLAG_COMPRESSED, 4, 0, u64::MAX, 0);
        assert!(RecalibrationReport::from_bytes(header.as_bytes()).is_err());

        let mut buffer = Vec::new();
        default_report().write(&mut buffer).unwrap();
        let mut header = ReportHeader::from_bytes(&buffer).unwrap();
        header.u_bytes = u64::MAX;
        buffer[..size_of::<ReportHeader>()].copy_from_slice(header.as_bytes());
        assert!(matches!(
            RecalibrationReport::from_bytes(&buffer),
            Err(Error::ReportError(ReportError::Truncated(_)))
        ));
    }

    // ==================== Gather Tests ====================

    #[test]
    fn test_combine_reloaded_reports() {
        let a = report(&["rg1", "rg2"], RecalibrationArgs::default());
        let b = report(&["rg2", "rg3"], RecalibrationArgs::default());

        let mut in_memory = report(&["rg1", "rg2"], RecalibrationArgs::default());
        in_memory.combine(&b).unwrap();

        let mut reloaded = round_trip(&a);
        reloaded.combine(&round_trip(&b)).unwrap();
        assert!(reloaded.is_merged());
        assert_eq!(reloaded.tables().rows(), in_memory.tables().rows());
        assert_eq!(reloaded.quantization(), in_memory.quantization());
    }

    #[test]
    fn test_gather() {
        let shards = vec![
            report(&["rg1"], RecalibrationArgs::default()),
            report(&["rg2", "rg1"], RecalibrationArgs::default()),
            report(&["rg3"], RecalibrationArgs::default()),
        ];
        let mut sequential = report(&["rg1"], RecalibrationArgs::default());
        sequential
            .combine(&report(&["rg2", "rg1"], RecalibrationArgs::default()))
            .unwrap();
        sequential
            .combine(&report(&["rg3"], RecalibrationArgs::default()))
            .unwrap();

        let gathered = RecalibrationReport::gather(shards).unwrap().unwrap();
        assert!(gathered.is_merged());
        assert_eq!(gathered.tables().rows(), sequential.tables().rows());
        assert_eq!(gathered.quantization(), sequential.quantization());
        assert!(RecalibrationReport::gather(Vec::new()).unwrap().is_none());
    }

    #[test]
    fn test_gather_incompatible() {
        let shards = vec![
            report(&["rg1"], RecalibrationArgs::default()),
            report(&["rg1"], RecalibrationArgs::default().use_standard_covariates(false)),
        ];
        assert!(matches!(
            RecalibrationReport::gather(shards),
            Err(Error::MergeError(MergeError::TableCountMismatch { .. }))
        ));
    }
}
