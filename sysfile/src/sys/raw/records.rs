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

//! Individual records in a system file.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io::{Cursor, Error as IoError, ErrorKind, Read, Seek},
    ops::Range,
};

use binrw::{BinRead, BinWrite, Endian};
use clap::ValueEnum;
use serde::Serialize;
use thiserror::Error as ThisError;

use crate::{
    data::ByteString,
    endian::FromBytes,
    sys::{
        raw::{bin_error_to_io, read_bytes, read_vec, Error, ErrorDetails, Magic, Record, Warning},
        serialize_endian, ProductVersion,
    },
};

/// Compression of the data in a system file.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, ValueEnum)]
pub enum Compression {
    /// Simple bytecode compression.
    Simple,

    /// Bytecode compression, further compressed with ZLIB.
    #[value(name = "zlib")]
    ZLib,
}

impl Compression {
    /// Returns the code for `compression` in the file header.
    pub fn code(compression: Option<Compression>) -> u32 {
        match compression {
            None => 0,
            Some(Compression::Simple) => 1,
            Some(Compression::ZLib) => 2,
        }
    }
}

/// A warning about the file header.
#[derive(ThisError, Clone, Debug)]
pub enum HeaderWarning {
    /// Unusual compression bias.
    #[error("Compression bias is {0} instead of the usual 100.")]
    UnexpectedBias(f64),
}

/// The file header at the start of every system file.
#[derive(Clone, Debug, Serialize)]
pub struct FileHeader {
    /// Magic number.
    pub magic: Magic,

    /// `@(#) SPSS DATA FILE` followed by the product that wrote the file,
    /// padded with spaces.
    pub eye_catcher: ByteString,

    /// Layout code, 2 or 3, which reveals the byte order.
    pub layout_code: u32,

    /// Number of 8-byte elements per case, if plausible.  Writers do not
    /// always get this right.
    pub nominal_case_size: Option<u32>,

    /// Compression.
    pub compression: Option<Compression>,

    /// 1-based element index of the weighting variable, if any.
    pub weight_index: Option<u32>,

    /// Number of cases, if known.
    pub n_cases: Option<u32>,

    /// Compression bias, normally 100.
    pub bias: f64,

    /// Creation date as `dd mmm yy`.
    pub creation_date: ByteString,

    /// Creation time as `HH:MM:SS`.
    pub creation_time: ByteString,

    /// File label, padded with spaces.
    pub file_label: ByteString,

    /// Byte order.
    #[serde(serialize_with = "serialize_endian")]
    pub endian: Endian,
}

/// The file header as stored.
#[derive(BinRead, BinWrite)]
pub(crate) struct RawHeader {
    pub magic: [u8; 4],
    pub eye_catcher: [u8; 60],
    pub layout_code: u32,
    pub nominal_case_size: u32,
    pub compression_code: u32,
    pub weight_index: u32,
    pub n_cases: u32,
    pub bias: f64,
    pub creation_date: [u8; 9],
    pub creation_time: [u8; 8],
    #[brw(pad_after = 3)]
    pub file_label: [u8; 64],
}

impl FileHeader {
    /// Size of the file header in bytes.
    pub const SIZE: u64 = 176;

    pub(crate) const NOMINAL_CASE_SIZE_OFFSETS: Range<u64> = 68..72;
    pub(crate) const WEIGHT_INDEX_OFFSETS: Range<u64> = 76..80;
    const BIAS_OFFSETS: Range<u64> = 84..92;
    pub(crate) const CREATION_DATE_OFFSETS: Range<u64> = 92..101;
    pub(crate) const CREATION_TIME_OFFSETS: Range<u64> = 101..109;

    /// Reads the file header from `r`.
    pub fn read<R>(r: &mut R, warn: &mut dyn FnMut(Warning)) -> Result<Self, Error>
    where
        R: Read + Seek,
    {
        let bytes: [u8; 176] = read_bytes(r).map_err(|error| match error.kind() {
            ErrorKind::UnexpectedEof => Error::new(None, ErrorDetails::NotASystemFile),
            _ => error.into(),
        })?;
        Self::parse(&bytes, warn).map_err(|details| Error::new(Some(0..Self::SIZE), details))
    }

    fn parse(bytes: &[u8; 176], warn: &mut dyn FnMut(Warning)) -> Result<Self, ErrorDetails> {
        if &bytes[8..20] == b"ENCRYPTEDSAV" {
            return Err(ErrorDetails::Encrypted);
        }
        let magic = Magic::try_from([bytes[0], bytes[1], bytes[2], bytes[3]])?;
        if magic == Magic::Ebcdic {
            return Err(crate::sys::encoding::Error::Ebcdic.into());
        }

        let (endian, raw) = [Endian::Big, Endian::Little]
            .into_iter()
            .find_map(|endian| {
                RawHeader::read_options(&mut Cursor::new(&bytes[..]), endian, ())
                    .ok()
                    .filter(|raw| raw.layout_code == 2 || raw.layout_code == 3)
                    .map(|raw| (endian, raw))
            })
            .ok_or(ErrorDetails::NotASystemFile)?;

        let compression = match (magic, raw.compression_code) {
            (Magic::Zsav, 2) => Some(Compression::ZLib),
            (Magic::Sav, 0) => None,
            (Magic::Sav, 1) => Some(Compression::Simple),
            (_, code) => return Err(ErrorDetails::BadCompression { magic, code }),
        };

        if raw.bias != 100.0 && raw.bias != 0.0 {
            warn(Warning::new(
                Some(Self::BIAS_OFFSETS),
                HeaderWarning::UnexpectedBias(raw.bias),
            ));
        }

        Ok(FileHeader {
            magic,
            eye_catcher: ByteString::from(&raw.eye_catcher[..]),
            layout_code: raw.layout_code,
            nominal_case_size: (1..i32::MAX as u32 / 16)
                .contains(&raw.nominal_case_size)
                .then_some(raw.nominal_case_size),
            compression,
            weight_index: (raw.weight_index > 0).then_some(raw.weight_index),
            n_cases: (raw.n_cases <= u32::MAX / 2).then_some(raw.n_cases),
            bias: raw.bias,
            creation_date: ByteString::from(&raw.creation_date[..]),
            creation_time: ByteString::from(&raw.creation_time[..]),
            file_label: ByteString::from(&raw.file_label[..]),
            endian,
        })
    }
}

/// Missing values in a [VariableRecord], still in raw form.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RawMissingValues {
    /// Discrete values.
    pub values: Vec<[u8; 8]>,

    /// Range `(low, high)`, for a numeric variable.
    pub range: Option<([u8; 8], [u8; 8])>,
}

#[derive(BinRead)]
struct RawVariableRecord {
    width: i32,
    has_label: u32,
    missing_value_code: i32,
    print_format: u32,
    write_format: u32,
    name: [u8; 8],
}

/// A variable record (type 2).
///
/// A numeric variable or a string variable up to 8 bytes wide takes one
/// record.  Each further 8 bytes of a wider string takes a continuation
/// record, with width -1.
#[derive(Clone, Debug, Serialize)]
pub struct VariableRecord {
    /// File offsets.
    pub offsets: Range<u64>,

    /// 0 for numeric, 1 to 255 for a string, or -1 for a continuation.
    pub width: i32,

    /// Short name, padded with spaces.
    pub name: ByteString,

    /// Packed print format.
    pub print_format: u32,

    /// Packed write format.
    pub write_format: u32,

    /// Missing values.
    pub missing_values: RawMissingValues,

    /// Variable label.
    pub label: Option<ByteString>,
}

impl VariableRecord {
    pub(crate) fn read<R>(r: &mut R, start: u64, endian: Endian) -> Result<Self, ErrorDetails>
    where
        R: Read + Seek,
    {
        let raw = RawVariableRecord::read_options(r, endian, ()).map_err(bin_error_to_io)?;
        if !(-1..=255).contains(&raw.width) {
            return Err(ErrorDetails::BadVariableWidth(raw.width));
        }
        let label = match raw.has_label {
            0 => None,
            1 => {
                let len: u32 = endian.parse(read_bytes::<4, _>(r)?);
                let mut label = read_vec(r, (len as usize).next_multiple_of(4))?;
                label.truncate(len as usize);
                Some(ByteString(label))
            }
            code => return Err(ErrorDetails::BadVariableLabelCode(code)),
        };
        let (n_values, has_range) = match raw.missing_value_code {
            code @ 0..=3 => (code as usize, false),
            -2 => (0, true),
            -3 => (1, true),
            code => return Err(ErrorDetails::BadMissingValueCode(code)),
        };
        let mut missing_values = RawMissingValues::default();
        if has_range {
            missing_values.range = Some((read_bytes(r)?, read_bytes(r)?));
        }
        for _ in 0..n_values {
            missing_values.values.push(read_bytes(r)?);
        }
        Ok(Self {
            offsets: start..r.stream_position()?,
            width: raw.width,
            name: ByteString::from(&raw.name[..]),
            print_format: raw.print_format,
            write_format: raw.write_format,
            missing_values,
            label,
        })
    }
}

/// A value label record (type 3) together with the variable index record
/// (type 4) that must follow it.
#[derive(Clone, Debug, Serialize)]
pub struct ValueLabelRecord {
    /// File offsets of both records.
    pub offsets: Range<u64>,

    /// Raw values and their labels.
    pub labels: Vec<([u8; 8], ByteString)>,

    /// 1-based element indexes of the labeled variables.
    pub var_indexes: Vec<u32>,
}

impl ValueLabelRecord {
    /// Most labels or indexes that one record can hold.
    pub const MAX: u32 = u32::MAX / 8;

    pub(crate) fn read<R>(r: &mut R, start: u64, endian: Endian) -> Result<Self, ErrorDetails>
    where
        R: Read + Seek,
    {
        let n: u32 = endian.parse(read_bytes::<4, _>(r)?);
        if n > Self::MAX {
            return Err(ErrorDetails::BadNumberOfValueLabels { n, max: Self::MAX });
        }
        let mut labels = Vec::new();
        for _ in 0..n {
            let value: [u8; 8] = read_bytes(r)?;
            let [len] = read_bytes::<1, _>(r)?;
            let mut label = read_vec(r, (len as usize + 1).next_multiple_of(8) - 1)?;
            label.truncate(len as usize);
            labels.push((value, ByteString(label)));
        }

        let rec_type: u32 = endian.parse(read_bytes::<4, _>(r)?);
        if rec_type != 4 {
            return Err(ErrorDetails::MissingVariableIndexRecord(rec_type));
        }
        let n: u32 = endian.parse(read_bytes::<4, _>(r)?);
        if n > Self::MAX {
            return Err(ErrorDetails::BadNumberOfVarIndexes { n, max: Self::MAX });
        }
        let mut var_indexes = Vec::new();
        for _ in 0..n {
            var_indexes.push(endian.parse(read_bytes::<4, _>(r)?));
        }
        Ok(Self {
            offsets: start..r.stream_position()?,
            labels,
            var_indexes,
        })
    }
}

/// A document record (type 6).
#[derive(Clone, Debug, Serialize)]
pub struct DocumentRecord {
    /// File offsets.
    pub offsets: Range<u64>,

    /// Lines, each [DocumentRecord::LINE_LEN] bytes.
    pub lines: Vec<ByteString>,
}

impl DocumentRecord {
    /// Length of a document line.
    pub const LINE_LEN: usize = 80;

    /// Most lines that a document record can hold.
    pub const MAX_LINES: u32 = i32::MAX as u32 / Self::LINE_LEN as u32;

    pub(crate) fn read<R>(r: &mut R, start: u64, endian: Endian) -> Result<Self, ErrorDetails>
    where
        R: Read + Seek,
    {
        let n: u32 = endian.parse(read_bytes::<4, _>(r)?);
        if n > Self::MAX_LINES {
            return Err(ErrorDetails::BadDocumentLength {
                n,
                max: Self::MAX_LINES,
            });
        }
        let lines = (0..n)
            .map(|_| read_vec(r, Self::LINE_LEN).map(ByteString))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            offsets: start..r.stream_position()?,
            lines,
        })
    }
}

/// A warning about a record.  The record is skipped.
#[derive(ThisError, Clone, Debug)]
pub enum RecordWarning {
    /// Wrong element size.
    #[error("Extension record subtype {subtype} has element size {size} instead of {expected}.")]
    BadElementSize {
        /// Subtype.
        subtype: u32,
        /// Actual size.
        size: u32,
        /// Expected size.
        expected: u32,
    },

    /// Wrong element count.
    #[error("Extension record subtype {subtype} has {count} elements instead of {expected}.")]
    BadElementCount {
        /// Subtype.
        subtype: u32,
        /// Actual count.
        count: u32,
        /// Expected count.
        expected: u32,
    },

    /// The contents stop short.
    #[error("Extension record subtype {0} ends partway through its contents.")]
    Truncated(u32),

    /// Long string missing values of the wrong length.
    #[error("Long string missing values record has value length {0} instead of 8.")]
    BadMissingValueLength(u32),
}

/// An extension record (type 7).  Known subtypes become other kinds of
/// [Record]; this is what remains of the others.
#[derive(Clone, Debug, Serialize)]
pub struct Extension {
    /// File offsets.
    pub offsets: Range<u64>,

    /// Subtype.
    pub subtype: u32,

    /// Size of each element in bytes.
    pub size: u32,

    /// Number of elements.
    pub count: u32,

    /// Contents, `size * count` bytes.
    pub data: Vec<u8>,
}

impl Extension {
    pub(crate) fn read<R>(
        r: &mut R,
        start: u64,
        endian: Endian,
        warn: &mut dyn FnMut(Warning),
    ) -> Result<Option<Record>, ErrorDetails>
    where
        R: Read + Seek,
    {
        let mut next_u32 = || -> Result<u32, IoError> { Ok(endian.parse(read_bytes::<4, _>(r)?)) };
        let subtype = next_u32()?;
        let size = next_u32()?;
        let count = next_u32()?;
        let Some(len) = size.checked_mul(count).filter(|len| *len <= i32::MAX as u32) else {
            return Err(ErrorDetails::ExtensionRecordTooLarge {
                subtype,
                size,
                count,
            });
        };
        let data = read_vec(r, len as usize)?;
        let extension = Extension {
            offsets: start..r.stream_position()?,
            subtype,
            size,
            count,
            data,
        };
        let offsets = extension.offsets.clone();
        match extension.parse(endian) {
            Ok(record) => Ok(Some(record)),
            Err(warning) => {
                warn(Warning::new(Some(offsets), warning));
                Ok(None)
            }
        }
    }

    fn check(&self, size: u32, count: Option<u32>) -> Result<(), RecordWarning> {
        if self.size != size {
            return Err(RecordWarning::BadElementSize {
                subtype: self.subtype,
                size: self.size,
                expected: size,
            });
        }
        match count {
            Some(count) if count != self.count => Err(RecordWarning::BadElementCount {
                subtype: self.subtype,
                count: self.count,
                expected: count,
            }),
            _ => Ok(()),
        }
    }

    fn read_binary<T>(&self, size: u32, count: u32, endian: Endian) -> Result<T, RecordWarning>
    where
        T: for<'a> BinRead<Args<'a> = ()>,
    {
        self.check(size, Some(count))?;
        T::read_options(&mut Cursor::new(&self.data), endian, ())
            .map_err(|_| RecordWarning::Truncated(self.subtype))
    }

    fn parse(self, endian: Endian) -> Result<Record, RecordWarning> {
        let offsets = self.offsets.clone();
        let truncated = RecordWarning::Truncated(self.subtype);
        let record = match self.subtype {
            3 => Record::IntegerInfo(IntegerInfoRecord {
                offsets,
                ..self.read_binary(4, 8, endian)?
            }),
            4 => Record::FloatInfo(FloatInfoRecord {
                offsets,
                ..self.read_binary(8, 3, endian)?
            }),
            16 => Record::NumberOfCases(NumberOfCasesRecord {
                offsets,
                ..self.read_binary(8, 2, endian)?
            }),
            11 => {
                self.check(4, None)?;
                let values = self
                    .data
                    .chunks_exact(4)
                    .map(|chunk| endian.parse([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .collect();
                Record::VarDisplay(VarDisplayRecord { offsets, values })
            }
            21 => {
                self.check(1, None)?;
                let labels = LongStringValueLabels::parse_all(&self.data, endian).ok_or(truncated)?;
                Record::LongStringValueLabels(LongStringValueLabelRecord { offsets, labels })
            }
            22 => {
                self.check(1, None)?;
                let values = LongStringMissingValues::parse_all(&self.data, endian)?;
                Record::LongStringMissingValues(LongStringMissingValueRecord { offsets, values })
            }
            subtype => match TextKind::from_subtype(subtype) {
                Some(kind) => {
                    self.check(1, None)?;
                    Record::Text(TextRecord {
                        offsets,
                        kind,
                        text: ByteString(self.data),
                    })
                }
                None => Record::Other(self),
            },
        };
        Ok(record)
    }
}

/// Machine integer info record (subtype 3).
#[derive(Clone, Debug, BinRead, BinWrite, Serialize)]
pub struct IntegerInfoRecord {
    /// File offsets.
    #[brw(ignore)]
    pub offsets: Range<u64>,

    /// Version of the product that wrote the file.
    pub version: ProductVersion,

    /// Machine code.
    pub machine_code: i32,

    /// Floating-point representation: 1 for IEEE 754, 2 for IBM 370, 3 for
    /// DEC VAX.
    pub floating_point_rep: i32,

    /// Compression code.
    pub compression_code: i32,

    /// Byte order: 1 for big-endian, 2 for little-endian.
    pub endianness: i32,

    /// Code page of the dictionary text.
    pub character_code: i32,
}

/// Machine floating-point info record (subtype 4).
#[derive(Clone, Debug, BinRead, BinWrite, Serialize)]
pub struct FloatInfoRecord {
    /// File offsets.
    #[brw(ignore)]
    pub offsets: Range<u64>,

    /// System-missing value.
    pub sysmis: f64,

    /// Value that ends ranges like `1 THRU HIGHEST`.
    pub highest: f64,

    /// Value that begins ranges like `LOWEST THRU 1`.
    pub lowest: f64,
}

/// Extended number of cases record (subtype 16).
#[derive(Clone, Debug, BinRead, BinWrite, Serialize)]
pub struct NumberOfCasesRecord {
    /// File offsets.
    #[brw(ignore)]
    pub offsets: Range<u64>,

    /// Always 1.
    pub one: u64,

    /// Number of cases, or `u64::MAX` if unknown.
    pub n_cases: u64,
}

/// Variable display parameters record (subtype 11): measure, width, and
/// alignment for each variable record other than continuations, either 3 or
/// (without width) 2 values per variable.
#[derive(Clone, Debug, Serialize)]
pub struct VarDisplayRecord {
    /// File offsets.
    pub offsets: Range<u64>,

    /// Raw values.
    pub values: Vec<u32>,
}

/// Reads the length-prefixed fields of subtypes 21 and 22.
struct Input<'a> {
    data: &'a [u8],
    endian: Endian,
}

impl<'a> Input<'a> {
    fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.data.len() {
            return None;
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Some(head)
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.bytes(N)?.try_into().ok()
    }

    fn u32(&mut self) -> Option<u32> {
        let bytes = self.array::<4>()?;
        Some(self.endian.parse(bytes))
    }

    fn counted(&mut self) -> Option<ByteString> {
        let len = self.u32()? as usize;
        self.bytes(len).map(ByteString::from)
    }
}

/// Value labels for one long string variable.
#[derive(Clone, Debug, Serialize)]
pub struct LongStringValueLabels {
    /// Variable name.
    pub var_name: ByteString,

    /// Variable width.
    pub width: u32,

    /// Values, each `width` bytes, and their labels.
    pub labels: Vec<(ByteString, ByteString)>,
}

impl LongStringValueLabels {
    fn parse_all(data: &[u8], endian: Endian) -> Option<Vec<Self>> {
        let mut input = Input { data, endian };
        let mut all = Vec::new();
        while !input.data.is_empty() {
            let var_name = input.counted()?;
            let width = input.u32()?;
            let n = input.u32()?;
            let labels = (0..n)
                .map(|_| Some((input.counted()?, input.counted()?)))
                .collect::<Option<Vec<_>>>()?;
            all.push(Self {
                var_name,
                width,
                labels,
            });
        }
        Some(all)
    }
}

/// Long string value labels record (subtype 21).
#[derive(Clone, Debug, Serialize)]
pub struct LongStringValueLabelRecord {
    /// File offsets.
    pub offsets: Range<u64>,

    /// Labels for each variable.
    pub labels: Vec<LongStringValueLabels>,
}

/// Missing values for one long string variable.
#[derive(Clone, Debug, Serialize)]
pub struct LongStringMissingValues {
    /// Variable name.
    pub var_name: ByteString,

    /// The first 8 bytes of each missing value.
    pub values: Vec<[u8; 8]>,
}

impl LongStringMissingValues {
    fn parse_all(data: &[u8], endian: Endian) -> Result<Vec<Self>, RecordWarning> {
        let mut input = Input { data, endian };
        let mut all = Vec::new();
        while !input.data.is_empty() {
            let parsed = (|| {
                let var_name = input.counted()?;
                let [n] = input.array::<1>()?;
                let value_len = input.u32()?;
                Some((var_name, n, value_len))
            })();
            let (var_name, n, value_len) = parsed.ok_or(RecordWarning::Truncated(22))?;
            if value_len != 8 {
                return Err(RecordWarning::BadMissingValueLength(value_len));
            }
            let mut values = Vec::new();
            for i in 0..n {
                // Some writers repeat the value length before every value.
                let repeated_len = input
                    .data
                    .get(..4)
                    .map(|b| endian.parse([b[0], b[1], b[2], b[3]]));
                if i > 0 && repeated_len == Some(8u32) {
                    input.bytes(4);
                }
                values.push(input.array().ok_or(RecordWarning::Truncated(22))?);
            }
            all.push(Self { var_name, values });
        }
        Ok(all)
    }
}

/// Long string missing values record (subtype 22).
#[derive(Clone, Debug, Serialize)]
pub struct LongStringMissingValueRecord {
    /// File offsets.
    pub offsets: Range<u64>,

    /// Missing values for each variable.
    pub values: Vec<LongStringMissingValues>,
}

/// The kinds of extension record whose contents are text.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum TextKind {
    /// Variable sets (subtype 5).
    VariableSets,
    /// Multiple response sets (subtype 7).
    MultipleResponse,
    /// Extra product info (subtype 10).
    ProductInfo,
    /// Long variable names (subtype 13).
    LongNames,
    /// Very long strings (subtype 14).
    VeryLongStrings,
    /// File attributes (subtype 17).
    FileAttributes,
    /// Variable attributes (subtype 18).
    VariableAttributes,
    /// Multiple response sets in the SPSS 14 format (subtype 19).
    ExtendedMultipleResponse,
    /// Character encoding (subtype 20).
    Encoding,
}

impl TextKind {
    const ALL: [(u32, TextKind); 9] = [
        (5, TextKind::VariableSets),
        (7, TextKind::MultipleResponse),
        (10, TextKind::ProductInfo),
        (13, TextKind::LongNames),
        (14, TextKind::VeryLongStrings),
        (17, TextKind::FileAttributes),
        (18, TextKind::VariableAttributes),
        (19, TextKind::ExtendedMultipleResponse),
        (20, TextKind::Encoding),
    ];

    /// Returns the kind for `subtype`, if it holds text.
    pub fn from_subtype(subtype: u32) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|(s, _)| *s == subtype)
            .map(|(_, kind)| *kind)
    }

    /// Returns the subtype.
    pub fn subtype(self) -> u32 {
        Self::ALL
            .iter()
            .find(|(_, kind)| *kind == self)
            .map_or(0, |(subtype, _)| *subtype)
    }
}

impl Display for TextKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            TextKind::VariableSets => "variable sets",
            TextKind::MultipleResponse | TextKind::ExtendedMultipleResponse => {
                "multiple response sets"
            }
            TextKind::ProductInfo => "extra product info",
            TextKind::LongNames => "long variable names",
            TextKind::VeryLongStrings => "very long strings",
            TextKind::FileAttributes => "file attributes",
            TextKind::VariableAttributes => "variable attributes",
            TextKind::Encoding => "character encoding",
        })
    }
}

/// An extension record that holds text in the file's encoding.
#[derive(Clone, Debug, Serialize)]
pub struct TextRecord {
    /// File offsets.
    pub offsets: Range<u64>,

    /// Which kind.
    pub kind: TextKind,

    /// Contents.
    pub text: ByteString,
}
