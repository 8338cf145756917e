// PSPP - a program for statistical analysis.
// Copyright (C) 2025 Free Software Foundation, Inc.
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <http://www.gnu.org/licenses/>.

//! Writing system files.
//!
//! [WriteOptions] encodes the dictionary into memory first, then writes it and
//! returns a [Writer] for the cases.  A seekable destination gets the final
//! case count patched into the file header and the extended case count
//! record when the writer closes.  A stream leaves both as unknown.

use std::{
    borrow::Cow,
    collections::HashSet,
    fmt::Write as _,
    fs::File,
    io::{BufWriter, Cursor, Error as IoError, ErrorKind, Result as IoResult, Seek, SeekFrom, Write},
    path::Path,
};

use binrw::{BinWrite, Endian, Error as BinError};
use chrono::{Local, NaiveDate, NaiveDateTime};
use either::Either;
use encoding_rs::Encoding;
use flate2::write::ZlibEncoder;

use crate::{
    data::Datum,
    dictionary::{CategoryLabels, Dictionary, MultipleResponseType},
    endian::{FloatFormat, ToBytes},
    format::Format,
    identifier::Identifier,
    sys::{
        encoding::codepage_from_encoding,
        raw::{
            bytecode::Compressor,
            cases::Layout,
            records::{
                Compression, FloatInfoRecord, IntegerInfoRecord, NumberOfCasesRecord, RawHeader,
            },
            zlib::{RawZHeader, RawZTrailer, ZBlock},
            Magic,
        },
        ProductVersion,
    },
    variable::{Attributes, Measure, Role, VarWidth, Variable, HIGHEST, LOWEST, SYSMIS},
};

/// System file format version.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SystemFileVersion {
    /// Only 8-byte variable names, without attributes.
    V2,

    /// Long variable names and attributes.
    #[default]
    V3,
}

/// Options for writing a system file.
#[derive(Clone, Debug)]
pub struct WriteOptions {
    /// How to compress case data, if at all.
    pub compression: Option<Compression>,

    /// File format version.
    pub version: SystemFileVersion,

    /// Byte order for integers and floating-point numbers.
    pub endian: Endian,

    /// Creation date and time to record.
    pub timestamp: NaiveDateTime,

    /// Product name.  Only the first 40 bytes are written.
    pub product_name: Cow<'static, str>,

    /// Product version.
    pub product_version: ProductVersion,

    /// Uncompressed bytes in each ZLIB block, a multiple of 8.
    pub zlib_block_size: u32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: Some(Compression::Simple),
            version: SystemFileVersion::default(),
            endian: Endian::NATIVE,
            timestamp: Local::now().naive_local(),
            product_name: Cow::from(concat!("pspp-sysfile ", env!("CARGO_PKG_VERSION"))),
            product_version: ProductVersion::VERSION,
            zlib_block_size: ZBlock::DEFAULT_SIZE,
        }
    }
}

impl WriteOptions {
    /// Constructs default options: simple compression, native byte order,
    /// the current time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns these options with `compression`.
    pub fn with_compression(self, compression: Option<Compression>) -> Self {
        Self {
            compression,
            ..self
        }
    }

    /// Returns these options with `version`.
    pub fn with_version(self, version: SystemFileVersion) -> Self {
        Self { version, ..self }
    }

    /// Returns these options with byte order `endian`.
    pub fn with_endian(self, endian: Endian) -> Self {
        Self { endian, ..self }
    }

    /// Returns these options with creation time `timestamp`.
    pub fn with_timestamp(self, timestamp: NaiveDateTime) -> Self {
        Self { timestamp, ..self }
    }

    /// Returns these options with product name `product_name`.
    pub fn with_product_name(self, product_name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            product_name: product_name.into(),
            ..self
        }
    }

    /// Returns these options with product version `product_version`.
    pub fn with_product_version(self, product_version: ProductVersion) -> Self {
        Self {
            product_version,
            ..self
        }
    }

    /// Returns these options with ZLIB blocks of `zlib_block_size` bytes,
    /// rounded down to a multiple of 8.
    pub fn with_zlib_block_size(self, zlib_block_size: u32) -> Self {
        Self {
            zlib_block_size: (zlib_block_size / 8 * 8).max(8),
            ..self
        }
    }

    /// Returns options that write the same bytes for the same input on any
    /// machine at any time.
    pub fn reproducible(compression: Option<Compression>) -> Self {
        let timestamp = NaiveDate::from_ymd_opt(2025, 7, 30)
            .and_then(|date| date.and_hms_opt(15, 7, 55))
            .unwrap_or_default();
        Self::new()
            .with_compression(compression)
            .with_endian(Endian::Little)
            .with_timestamp(timestamp)
            .with_product_name("PSPP TEST DATA FILE")
            .with_product_version(ProductVersion(1, 2, 3))
    }

    /// Creates `path` and writes `dictionary` to it.
    pub fn write_file(
        self,
        dictionary: &Dictionary,
        path: impl AsRef<Path>,
    ) -> Result<Writer<BufWriter<File>>, BinError> {
        self.write_writer(dictionary, BufWriter::new(File::create(path)?))
    }

    /// Writes `dictionary` to `writer`, which must be able to seek so that
    /// [Writer::close] can record the number of cases.
    pub fn write_writer<W>(self, dictionary: &Dictionary, mut writer: W) -> Result<Writer<W>, BinError>
    where
        W: Write + Seek,
    {
        let start = writer.stream_position()?;
        let seek: fn(&mut W, SeekFrom) -> IoResult<u64> = <W as Seek>::seek;
        Writer::new(self, dictionary, writer, Some((seek, start)))
    }

    /// Writes `dictionary` to `writer`, which need not be able to seek.  The
    /// file records the number of cases as unknown.  ZLIB compression needs
    /// to seek, so it is not available.
    pub fn write_stream<W>(self, dictionary: &Dictionary, writer: W) -> Result<Writer<W>, BinError>
    where
        W: Write,
    {
        if self.compression == Some(Compression::ZLib) {
            return Err(BinError::Io(IoError::new(
                ErrorKind::InvalidInput,
                "ZLIB compression requires an output that can seek",
            )));
        }
        Writer::new(self, dictionary, writer, None)
    }
}

const BIAS: f64 = 100.0;

/// Offset of the case count within the file header.
const HEADER_N_CASES: u64 = 80;

/// Copies `bytes` into an array, truncating or padding with `pad`.
fn fixed<const N: usize>(bytes: &[u8], pad: u8) -> [u8; N] {
    let mut array = [pad; N];
    let n = bytes.len().min(N);
    array[..n].copy_from_slice(&bytes[..n]);
    array
}

/// Returns the longest prefix of `s` that encodes in at most `max` bytes.
fn truncate_encoded<'a>(s: &'a str, max: usize, encoding: &'static Encoding) -> &'a str {
    let mut end = 0;
    let mut len = 0;
    for (index, c) in s.char_indices() {
        let mut buf = [0; 4];
        len += encoding.encode(c.encode_utf8(&mut buf)).0.len();
        if len > max {
            break;
        }
        end = index + c.len_utf8();
    }
    &s[..end]
}

/// Chooses a name of at most 8 bytes for each variable record, one per
/// segment, all distinct.  A variable keeps the short names it already has
/// where they qualify; its first segment otherwise tries its name in
/// uppercase, truncated.  The rest get names like `NAME_1`.
fn short_names(dictionary: &Dictionary) -> Vec<Vec<Identifier>> {
    let encoding = dictionary.encoding();
    let mut used = HashSet::new();
    let candidates = dictionary
        .variables()
        .iter()
        .map(|variable| {
            let upper = variable.name().as_str().to_uppercase();
            let derived = Identifier::from_encoding(truncate_encoded(&upper, 8, encoding), encoding);
            (0..variable.width.segments().len())
                .map(|segment| match variable.short_names.get(segment) {
                    Some(name) => Some(name.clone()),
                    None if segment == 0 => derived.clone().ok(),
                    None => None,
                })
                .map(|name| {
                    name.filter(|name| {
                        encoding.encode(name.as_str()).0.len() <= 8 && used.insert(name.clone())
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    dictionary
        .variables()
        .iter()
        .zip(candidates)
        .map(|(variable, names)| {
            let upper = variable.name().as_str().to_uppercase();
            names
                .into_iter()
                .map(|name| {
                    name.unwrap_or_else(|| {
                        (1usize..)
                            .filter_map(|n| {
                                let suffix = format!("_{n}");
                                let base = truncate_encoded(&upper, 8 - suffix.len(), encoding);
                                let base = if base.is_empty() { "V" } else { base };
                                Identifier::from_encoding(format!("{base}{suffix}"), encoding).ok()
                            })
                            .find(|name| used.insert(name.clone()))
                            .unwrap_or_else(|| variable.name().clone())
                    })
                })
                .collect()
        })
        .collect()
}

/// Formats `attributes` the way the attribute records store them.
fn format_attributes(attributes: &Attributes) -> String {
    let mut s = String::new();
    for (name, values) in &attributes.0 {
        let _ = write!(s, "{name}(");
        for value in values {
            let _ = writeln!(s, "'{value}'");
        }
        s.push(')');
    }
    s
}

/// Encodes a dictionary as the records that precede the case data.
struct DictionaryEncoder<'a> {
    options: &'a WriteOptions,
    dictionary: &'a Dictionary,
    short_names: Vec<Vec<Identifier>>,
    out: Cursor<Vec<u8>>,

    /// Offset in `out` of the count in the extended number of cases record.
    n_cases_offset: u64,
}

impl<'a> DictionaryEncoder<'a> {
    fn new(options: &'a WriteOptions, dictionary: &'a Dictionary) -> Self {
        Self {
            options,
            dictionary,
            short_names: short_names(dictionary),
            out: Cursor::new(Vec::new()),
            n_cases_offset: 0,
        }
    }

    fn put<T>(&mut self, value: T) -> Result<(), BinError>
    where
        T: for<'b> BinWrite<Args<'b> = ()>,
    {
        value.write_options(&mut self.out, self.options.endian, ())
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), BinError> {
        Ok(self.out.write_all(bytes)?)
    }

    fn encode<'s>(&self, s: &'s str) -> Cow<'s, [u8]> {
        self.dictionary.encoding().encode(s).0
    }

    /// Name by which extension records refer to variable `index`.  Version 2
    /// files have only short names.
    fn record_name(&self, index: usize) -> &Identifier {
        match self.options.version {
            SystemFileVersion::V2 => &self.short_names[index][0],
            SystemFileVersion::V3 => self.dictionary.variables()[index].name(),
        }
    }

    fn dictionary(&self) -> &'a Dictionary {
        self.dictionary
    }

    fn variables(&self) -> impl Iterator<Item = (usize, &'a Variable)> + use<'a> {
        self.dictionary().variables().iter().enumerate()
    }

    /// Encodes the whole dictionary, returning the bytes and the offset
    /// within them of the extended case count.
    fn encode_all(mut self) -> Result<(Vec<u8>, u64), BinError> {
        self.header()?;
        self.variable_records()?;
        self.value_labels()?;
        self.documents()?;
        self.machine_info()?;
        self.variable_sets()?;
        self.mrsets(true)?;
        self.display_parameters()?;
        self.long_names()?;
        self.very_long_strings()?;
        self.n_cases()?;
        self.long_string_value_labels()?;
        self.long_string_missing_values()?;
        self.attributes()?;
        self.mrsets(false)?;
        self.text_record(20, self.dictionary.encoding().name())?;
        self.put((999u32, 0u32))?;
        Ok((self.out.into_inner(), self.n_cases_offset))
    }

    fn header(&mut self) -> Result<(), BinError> {
        let variables = self.dictionary.variables();
        let n_elements = |variables: &[Variable]| {
            variables
                .iter()
                .map(|variable| variable.width.n_case_elements())
                .sum::<usize>() as u32
        };
        let product = truncate_encoded(&self.options.product_name, 40, self.dictionary.encoding());
        let eye_catcher = format!("@(#) SPSS DATA FILE {product}");
        let timestamp = self.options.timestamp;
        let label = self.dictionary.file_label.as_deref().unwrap_or_default();
        let header = RawHeader {
            magic: match self.options.compression {
                Some(Compression::ZLib) => Magic::Zsav,
                _ => Magic::Sav,
            }
            .bytes(),
            eye_catcher: fixed(&self.encode(&eye_catcher), b' '),
            layout_code: 2,
            nominal_case_size: n_elements(variables),
            compression_code: Compression::code(self.options.compression),
            weight_index: self
                .dictionary
                .weight_index()
                .map_or(0, |index| n_elements(&variables[..index]) + 1),
            n_cases: u32::MAX,
            bias: BIAS,
            creation_date: fixed(timestamp.format("%d %b %y").to_string().as_bytes(), b' '),
            creation_time: fixed(timestamp.format("%H:%M:%S").to_string().as_bytes(), b' '),
            file_label: fixed(&self.encode(label), b' '),
        };
        self.put(header)
    }

    /// Writes one type 2 record per segment of each variable, each followed
    /// by the continuation records for the rest of its 8-byte elements.
    fn variable_records(&mut self) -> Result<(), BinError> {
        let endian = self.options.endian;
        for (index, variable) in self.variables() {
            for (segment, width) in variable.width.segments().into_iter().enumerate() {
                let first = segment == 0;
                let (print, write) = match first {
                    true => (variable.print_format, variable.write_format),
                    false => (Format::default_for_width(width), Format::default_for_width(width)),
                };
                let label = variable.label().filter(|_| first).map(|label| self.encode(label));
                let missing = &variable.missing_values;
                let has_missing = first && !variable.width.is_long_string();
                let missing_code = match (has_missing, missing.range()) {
                    (false, _) => 0,
                    (true, None) => missing.values().len() as i32,
                    (true, Some(_)) => -2 - missing.values().len() as i32,
                };
                let name: [u8; 8] = fixed(&self.encode(self.short_names[index][segment].as_str()), b' ');
                self.put((
                    2u32,
                    width.to_raw(),
                    label.is_some() as u32,
                    missing_code,
                    print.resized(width).to_raw(),
                    write.resized(width).to_raw(),
                    name,
                ))?;

                if let Some(label) = label {
                    let label = &label[..label.len().min(255)];
                    self.put(label.len() as u32)?;
                    self.put_bytes(label)?;
                    self.put_bytes(&[0; 3][..label.len().next_multiple_of(4) - label.len()])?;
                }
                if has_missing {
                    if let Some(range) = missing.range() {
                        let (low, high) = range.ends();
                        self.put((low, high))?;
                    }
                    for value in missing.values() {
                        self.put_bytes(&raw_value(value, endian))?;
                    }
                }
                for _ in 1..width.n_elements() {
                    self.put((2u32, -1i32, 0u32, 0i32, 0u32, 0u32, [b' '; 8]))?;
                }
            }
        }
        Ok(())
    }

    /// Writes a type 3 record and its type 4 index record for each variable
    /// with value labels that fits in 8 bytes.
    fn value_labels(&mut self) -> Result<(), BinError> {
        let endian = self.options.endian;
        let mut position = 1;
        for (_, variable) in self.variables() {
            let index = position;
            position += variable.width.n_case_elements() as u32;
            if variable.value_labels.is_empty() || variable.width.is_long_string() {
                continue;
            }
            self.put((3u32, variable.value_labels.len() as u32))?;
            for (value, label) in &variable.value_labels.0 {
                let label = self.encode(label);
                let label = &label[..label.len().min(255)];
                self.put_bytes(&raw_value(value, endian))?;
                self.put(label.len() as u8)?;
                self.put_bytes(label)?;
                let padding = (label.len() + 1).next_multiple_of(8) - (label.len() + 1);
                self.put_bytes(&[b' '; 7][..padding])?;
            }
            self.put((4u32, 1u32, index))?;
        }
        Ok(())
    }

    fn documents(&mut self) -> Result<(), BinError> {
        let documents = &self.dictionary().documents;
        if !documents.is_empty() {
            self.put((6u32, documents.len() as u32))?;
            for line in documents {
                let line: [u8; 80] = fixed(&self.encode(line), b' ');
                self.put(line)?;
            }
        }
        Ok(())
    }

    fn machine_info(&mut self) -> Result<(), BinError> {
        let integer = IntegerInfoRecord {
            offsets: 0..0,
            version: self.options.product_version,
            machine_code: -1,
            floating_point_rep: FloatFormat::Ieee.code(),
            compression_code: 1,
            endianness: match self.options.endian {
                Endian::Big => 1,
                Endian::Little => 2,
            },
            character_code: codepage_from_encoding(self.dictionary.encoding()).unwrap_or(-1),
        };
        self.put((7u32, 3u32, 4u32, 8u32))?;
        self.put(integer)?;

        let float = FloatInfoRecord {
            offsets: 0..0,
            sysmis: SYSMIS,
            highest: HIGHEST,
            lowest: LOWEST,
        };
        self.put((7u32, 4u32, 8u32, 3u32))?;
        self.put(float)
    }

    /// Writes an extension record of 1-byte elements, unless it would be
    /// empty.
    fn byte_record(&mut self, subtype: u32, bytes: &[u8]) -> Result<(), BinError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.put((7u32, subtype, 1u32, bytes.len() as u32))?;
        self.put_bytes(bytes)
    }

    fn text_record(&mut self, subtype: u32, text: &str) -> Result<(), BinError> {
        let bytes = self.encode(text).into_owned();
        self.byte_record(subtype, &bytes)
    }

    fn variable_sets(&mut self) -> Result<(), BinError> {
        let mut text = String::new();
        for set in &self.dictionary().variable_sets {
            let _ = write!(text, "{}=", set.name);
            for index in &set.variables {
                let _ = write!(text, " {}", self.record_name(*index));
            }
            text.push('\n');
        }
        self.text_record(5, &text)
    }

    /// Writes the multiple response sets that SPSS before version 14
    /// understands (subtype 7) if `old` is true, otherwise the rest
    /// (subtype 19).
    fn mrsets(&mut self, old: bool) -> Result<(), BinError> {
        let mut out = Vec::new();
        for set in &self.dictionary().mrsets {
            if set.mr_type.supported_before_v14() != old {
                continue;
            }
            out.extend_from_slice(&self.encode(set.name.as_str()));
            out.push(b'=');
            let mut label_from_variable = false;
            match &set.mr_type {
                MultipleResponseType::MultipleCategory => out.push(b'C'),
                MultipleResponseType::MultipleDichotomy { datum, labels } => {
                    match labels {
                        CategoryLabels::VarLabels => out.push(b'D'),
                        CategoryLabels::CountedValues {
                            use_var_label_as_mrset_label,
                        } => {
                            label_from_variable = *use_var_label_as_mrset_label;
                            out.extend_from_slice(match label_from_variable {
                                true => &b"E 11 "[..],
                                false => &b"E 1 "[..],
                            });
                        }
                    }
                    let value = match datum {
                        Datum::Number(number) => number.unwrap_or(SYSMIS).to_string().into_bytes(),
                        Datum::String(string) => {
                            let mut string = string.clone();
                            string.trim_end();
                            string.0
                        }
                    };
                    let _ = write!(out, "{} ", value.len());
                    out.extend_from_slice(&value);
                }
            }
            let label = match label_from_variable {
                true => Cow::from(&b""[..]),
                false => self.encode(&set.label),
            };
            let _ = write!(out, " {} ", label.len());
            out.extend_from_slice(&label);
            for index in &set.variables {
                out.push(b' ');
                let name = self.short_names[*index][0].as_str().to_ascii_lowercase();
                out.extend_from_slice(&self.encode(&name));
            }
            out.push(b'\n');
        }
        self.byte_record(if old { 7 } else { 19 }, &out)
    }

    /// Writes measure, display width, and alignment for every segment.
    fn display_parameters(&mut self) -> Result<(), BinError> {
        let mut values = Vec::new();
        for (_, variable) in self.variables() {
            for (segment, width) in variable.width.segments().into_iter().enumerate() {
                values.push(Measure::code(variable.measure));
                values.push(match segment {
                    0 => variable.display_width,
                    _ => width.default_display_width(),
                });
                values.push(variable.alignment.code());
            }
        }
        if values.is_empty() {
            return Ok(());
        }
        self.put((7u32, 11u32, 4u32, values.len() as u32))?;
        self.put(values)
    }

    fn long_names(&mut self) -> Result<(), BinError> {
        if self.options.version == SystemFileVersion::V2 {
            return Ok(());
        }
        let text = self
            .variables()
            .map(|(index, variable)| format!("{}={}", self.short_names[index][0], variable.name()))
            .collect::<Vec<_>>()
            .join("\t");
        self.text_record(13, &text)
    }

    fn very_long_strings(&mut self) -> Result<(), BinError> {
        let mut text = String::new();
        for (index, variable) in self.variables() {
            if let VarWidth::String(width) = variable.width
                && variable.width.is_very_long_string()
            {
                let _ = write!(text, "{}={width:05}\0\t", self.short_names[index][0]);
            }
        }
        self.text_record(14, &text)
    }

    /// Writes the extended number of cases record with the count unknown.
    fn n_cases(&mut self) -> Result<(), BinError> {
        self.put((7u32, 16u32, 8u32, 2u32))?;
        self.n_cases_offset = self.out.position() + 8;
        self.put(NumberOfCasesRecord {
            offsets: 0..0,
            one: 1,
            n_cases: u64::MAX,
        })
    }

    fn counted(&self, out: &mut Vec<u8>, bytes: &[u8]) {
        out.extend_from_slice(&self.options.endian.to_bytes(bytes.len() as u32));
        out.extend_from_slice(bytes);
    }

    fn long_string_value_labels(&mut self) -> Result<(), BinError> {
        let endian = self.options.endian;
        let mut out = Vec::new();
        for (index, variable) in self.variables() {
            let VarWidth::String(width) = variable.width else {
                continue;
            };
            if variable.value_labels.is_empty() || !variable.width.is_long_string() {
                continue;
            }
            self.counted(&mut out, &self.encode(self.record_name(index).as_str()));
            out.extend_from_slice(&endian.to_bytes(width as u32));
            out.extend_from_slice(&endian.to_bytes(variable.value_labels.len() as u32));
            for (value, label) in &variable.value_labels.0 {
                let value = value
                    .as_string()
                    .map(|value| value.clone().resized(width as usize))
                    .unwrap_or_default();
                self.counted(&mut out, value.as_bytes());
                self.counted(&mut out, &self.encode(label));
            }
        }
        self.byte_record(21, &out)
    }

    fn long_string_missing_values(&mut self) -> Result<(), BinError> {
        let endian = self.options.endian;
        let mut out = Vec::new();
        for (index, variable) in self.variables() {
            let values = variable.missing_values.values();
            if values.is_empty() || !variable.width.is_long_string() {
                continue;
            }
            self.counted(&mut out, &self.encode(self.record_name(index).as_str()));
            out.push(values.len() as u8);
            out.extend_from_slice(&endian.to_bytes(8u32));
            for value in values {
                out.extend_from_slice(&raw_value(value, endian));
            }
        }
        self.byte_record(22, &out)
    }

    /// Writes the file attributes (subtype 17) and variable attributes
    /// (subtype 18) records.  The variable attributes include each
    /// variable's role.
    fn attributes(&mut self) -> Result<(), BinError> {
        if self.options.version == SystemFileVersion::V2 {
            return Ok(());
        }
        let file = format_attributes(&self.dictionary.attributes);
        self.text_record(17, &file)?;

        let role = Identifier::new(Role::ATTRIBUTE).ok();
        let variables = self
            .variables()
            .filter_map(|(index, variable)| {
                let mut attributes = variable.attributes.clone();
                if variable.role != Role::Input
                    && let Some(role) = role.clone()
                {
                    attributes = attributes.with(role, vec![variable.role.code().to_string()]);
                }
                (!attributes.is_empty())
                    .then(|| format!("{}:{}", self.record_name(index), format_attributes(&attributes)))
            })
            .collect::<Vec<_>>()
            .join("/");
        self.text_record(18, &variables)
    }
}

/// An 8-byte value for a variable record or value label record: a number, or
/// a string padded with spaces.
fn raw_value(datum: &Datum, endian: Endian) -> [u8; 8] {
    match datum {
        Datum::Number(number) => endian.to_bytes(number.unwrap_or(SYSMIS)),
        Datum::String(string) => fixed(string.as_bytes(), b' '),
    }
}

/// Seeking, for a destination that supports it, and the file offset of the
/// file header.
type Seeker<W> = (fn(&mut W, SeekFrom) -> IoResult<u64>, u64);

/// Writes cases to a system file.
///
/// Dropping a [Writer] finishes the file, ignoring errors.  Use
/// [Writer::close] to find out about them.
pub struct Writer<W>
where
    W: Write,
{
    endian: Endian,
    compression: Option<Compression>,
    layout: Vec<Layout>,
    compressor: Compressor,
    sink: Option<Either<W, ZlibWriter<W>>>,
    n_cases: u64,
    seeker: Option<Seeker<W>>,

    /// File offset of the count in the extended number of cases record.
    n_cases_offset: u64,
}

fn invalid_case(message: &'static str) -> BinError {
    BinError::Io(IoError::new(ErrorKind::InvalidInput, message))
}

impl<W> Writer<W>
where
    W: Write,
{
    fn new(
        options: WriteOptions,
        dictionary: &Dictionary,
        mut inner: W,
        seeker: Option<Seeker<W>>,
    ) -> Result<Self, BinError> {
        let (bytes, n_cases_offset) = DictionaryEncoder::new(&options, dictionary).encode_all()?;
        inner.write_all(&bytes)?;
        let start = seeker.map_or(0, |(_, start)| start);
        let data_offset = start + bytes.len() as u64;
        let sink = match options.compression {
            Some(Compression::ZLib) => Either::Right(ZlibWriter::new(
                inner,
                data_offset,
                options.endian,
                options.zlib_block_size,
            )?),
            _ => Either::Left(inner),
        };
        Ok(Self {
            endian: options.endian,
            compression: options.compression,
            layout: dictionary
                .variables()
                .iter()
                .map(|variable| Layout::new(variable.width))
                .collect(),
            compressor: Compressor::new(BIAS, options.endian),
            sink: Some(sink),
            n_cases: 0,
            seeker,
            n_cases_offset: start + n_cases_offset,
        })
    }

    /// Returns the number of cases written so far.
    pub fn n_cases(&self) -> u64 {
        self.n_cases
    }

    /// Writes `case`, which must have one value of the right type for each
    /// variable.  Strings are truncated or padded with spaces to fit.
    pub fn write_case<'c>(
        &mut self,
        case: impl IntoIterator<Item = &'c Datum>,
    ) -> Result<(), BinError> {
        let case = case.into_iter().collect::<Vec<_>>();
        if case.len() != self.layout.len() {
            return Err(invalid_case("case has the wrong number of values"));
        }
        if self.layout.iter().zip(&case).any(|(layout, datum)| {
            !matches!(
                (layout, datum),
                (Layout::Numeric, Datum::Number(_)) | (Layout::String { .. }, Datum::String(_))
            )
        }) {
            return Err(invalid_case("case value has the wrong type"));
        }
        let Some(sink) = self.sink.as_mut() else {
            return Err(invalid_case("writer is closed"));
        };

        for (layout, datum) in self.layout.iter().zip(case) {
            match (layout, datum) {
                (Layout::String { width, segments }, Datum::String(string)) => {
                    let string = string.clone().resized(*width);
                    let mut data = string.as_bytes();
                    for &(n_data, n_padding) in segments {
                        let (head, tail) = data.split_at(n_data);
                        data = tail;
                        let mut stored = head.to_vec();
                        stored.resize(n_data + n_padding, b' ');
                        match self.compression {
                            None => sink.write_all(&stored)?,
                            Some(_) => {
                                for chunk in stored.chunks(8) {
                                    self.compressor.put_chunk(sink, chunk)?;
                                }
                            }
                        }
                    }
                }
                (_, Datum::Number(number)) => match self.compression {
                    None => sink.write_all(&self.endian.to_bytes(number.unwrap_or(SYSMIS)))?,
                    Some(_) => self.compressor.put_number(sink, *number)?,
                },
                _ => return Err(invalid_case("case value has the wrong type")),
            }
        }
        self.n_cases += 1;
        Ok(())
    }

    /// Finishes the file and returns the destination.
    pub fn close(mut self) -> Result<Option<W>, BinError> {
        self.finish()
    }

    /// Flushes compressed data, writes the ZLIB trailer if any, and records
    /// the number of cases if the destination can seek.  Afterward, writing
    /// cases fails and this returns `Ok(None)`.
    pub fn finish(&mut self) -> Result<Option<W>, BinError> {
        let Some(sink) = self.sink.take() else {
            return Ok(None);
        };
        let (mut inner, zheader) = match sink {
            Either::Left(mut inner) => {
                self.compressor.flush(&mut inner)?;
                (inner, None)
            }
            Either::Right(mut zlib) => {
                self.compressor.flush(&mut zlib)?;
                let (inner, zheader) = zlib.finish()?;
                (inner, Some(zheader))
            }
        };
        if let Some((seek, start)) = self.seeker {
            let end = seek(&mut inner, SeekFrom::Current(0))?;
            let mut patch = |offset: u64, bytes: &[u8]| -> IoResult<()> {
                seek(&mut inner, SeekFrom::Start(offset))?;
                inner.write_all(bytes)
            };
            if let Ok(n_cases) = u32::try_from(self.n_cases)
                && n_cases != u32::MAX
            {
                patch(start + HEADER_N_CASES, &self.endian.to_bytes(n_cases))?;
            }
            patch(self.n_cases_offset, &self.endian.to_bytes(self.n_cases))?;
            if let Some(zheader) = zheader {
                let mut bytes = Cursor::new(Vec::new());
                zheader.write_options(&mut bytes, self.endian, ())?;
                patch(zheader.zheader_offset, bytes.get_ref())?;
            }
            seek(&mut inner, SeekFrom::Start(end))?;
        }
        inner.flush()?;
        Ok(Some(inner))
    }
}

impl<W> Drop for Writer<W>
where
    W: Write,
{
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// Compresses simple-compressed data into ZLIB blocks.  The ZLIB header goes
/// out first with placeholder offsets, and [ZlibWriter::finish] returns its
/// final contents for the caller to patch in.
struct ZlibWriter<W> {
    inner: W,
    endian: Endian,
    zheader_offset: u64,

    /// File offset where the next compressed byte goes.
    offset: u64,
    encoder: ZlibEncoder<Vec<u8>>,
    block_in: u32,
    trailer: RawZTrailer,
}

impl<W> ZlibWriter<W>
where
    W: Write,
{
    fn new(mut inner: W, offset: u64, endian: Endian, block_size: u32) -> Result<Self, BinError> {
        let placeholder = RawZHeader {
            zheader_offset: offset,
            ztrailer_offset: 0,
            ztrailer_len: 0,
        };
        let mut bytes = Cursor::new(Vec::new());
        placeholder.write_options(&mut bytes, endian, ())?;
        inner.write_all(bytes.get_ref())?;
        Ok(Self {
            inner,
            endian,
            zheader_offset: offset,
            offset: offset + 24,
            encoder: ZlibEncoder::new(Vec::new(), flate2::Compression::new(1)),
            block_in: 0,
            trailer: RawZTrailer {
                int_bias: -BIAS as i64,
                zero: 0,
                block_size,
                blocks: Vec::new(),
            },
        })
    }

    fn end_block(&mut self) -> IoResult<()> {
        if self.block_in == 0 {
            return Ok(());
        }
        let compressed = self.encoder.reset(Vec::new())?;
        self.inner.write_all(&compressed)?;
        let uncompressed_ofs = match self.trailer.blocks.last() {
            Some(prev) => prev.uncompressed_ofs + prev.uncompressed_size as u64,
            None => self.zheader_offset,
        };
        self.trailer.blocks.push(ZBlock {
            uncompressed_ofs,
            compressed_ofs: self.offset,
            uncompressed_size: self.block_in,
            compressed_size: compressed.len() as u32,
        });
        self.offset += compressed.len() as u64;
        self.block_in = 0;
        Ok(())
    }

    fn finish(mut self) -> Result<(W, RawZHeader), BinError> {
        self.end_block()?;
        let mut bytes = Cursor::new(Vec::new());
        self.trailer.write_options(&mut bytes, self.endian, ())?;
        self.inner.write_all(bytes.get_ref())?;
        let zheader = RawZHeader {
            zheader_offset: self.zheader_offset,
            ztrailer_offset: self.offset,
            ztrailer_len: self.trailer.len() as u64,
        };
        Ok((self.inner, zheader))
    }
}

impl<W> Write for ZlibWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        if self.block_in >= self.trailer.block_size {
            self.end_block()?;
        }
        let n = buf
            .len()
            .min((self.trailer.block_size - self.block_in) as usize);
        self.encoder.write_all(&buf[..n])?;
        self.block_in += n as u32;
        Ok(n)
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use encoding_rs::UTF_8;

    use crate::{
        dictionary::Dictionary,
        identifier::Identifier,
        variable::{VarWidth, Variable},
    };

    use super::{short_names, truncate_encoded};

    fn dictionary(names: &[(&str, VarWidth)]) -> Dictionary {
        let mut dictionary = Dictionary::new(UTF_8);
        for (name, width) in names {
            let variable = Variable::new(Identifier::new(*name).unwrap(), *width);
            dictionary.add_var(variable).unwrap();
        }
        dictionary
    }

    fn names(dictionary: &Dictionary) -> Vec<Vec<String>> {
        short_names(dictionary)
            .into_iter()
            .map(|names| names.iter().map(|name| name.to_string()).collect())
            .collect()
    }

    #[test]
    fn truncation() {
        assert_eq!(truncate_encoded("abcdefghij", 8, UTF_8), "abcdefgh");
        assert_eq!(truncate_encoded("ééééé", 8, UTF_8), "éééé");
        assert_eq!(truncate_encoded("ab", 8, UTF_8), "ab");
    }

    #[test]
    fn generated_short_names() {
        let dictionary = dictionary(&[
            ("LongVariableName1", VarWidth::Numeric),
            ("LongVariableName2", VarWidth::Numeric),
            ("x", VarWidth::String(600)),
        ]);
        assert_eq!(
            names(&dictionary),
            vec![
                vec!["LONGVARI"],
                vec!["LONGVA_1"],
                vec!["X", "X_1", "X_2"],
            ]
        );
    }

    #[test]
    fn existing_short_names_win() {
        let mut dictionary = dictionary(&[("first", VarWidth::Numeric), ("second", VarWidth::Numeric)]);
        dictionary.var_mut(1).unwrap().short_names = vec![Identifier::new("S2").unwrap()];
        assert_eq!(names(&dictionary), vec![vec!["FIRST"], vec!["S2"]]);
    }
}
