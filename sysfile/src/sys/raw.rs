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

//! Raw system file records.
//!
//! A [Reader] splits a system file into [Record]s and then hands over to
//! [Cases] for the data.  Text in the records stays in the file's encoding,
//! since the encoding is only certain once every record has been read.
//! [ReadOptions](super::ReadOptions) builds a dictionary from the records.

use std::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    io::{Error as IoError, ErrorKind, Read, Seek},
    ops::Range,
};

use binrw::{Endian, Error as BinError};
use serde::Serialize;
use thiserror::Error as ThisError;

use crate::{
    endian::FromBytes,
    sys::{cooked::DictionaryWarning, encoding::Error as EncodingError},
    variable::VarWidth,
};

pub mod bytecode;
pub mod cases;
pub mod records;
pub mod zlib;

pub use cases::{CaseWarning, Cases};
pub use records::{
    Compression, DocumentRecord, Extension, FileHeader, FloatInfoRecord, HeaderWarning,
    IntegerInfoRecord, LongStringMissingValueRecord, LongStringValueLabelRecord,
    NumberOfCasesRecord, RecordWarning, TextKind, TextRecord, ValueLabelRecord,
    VarDisplayRecord, VariableRecord,
};
use zlib::{
    ZHeader, ZHeaderError, ZHeaderWarning, ZTrailer, ZTrailerError, ZlibReader,
    ZlibTrailerWarning,
};

/// A problem that stops reading a system file.
#[derive(Debug)]
pub struct Error {
    /// File offsets of the problem, if known.
    pub offsets: Option<Range<u64>>,

    /// What went wrong.
    pub details: ErrorDetails,
}

impl std::error::Error for Error {}

impl Error {
    /// Constructs an error from `offsets` and `details`.
    pub fn new(offsets: Option<Range<u64>>, details: ErrorDetails) -> Self {
        Self { offsets, details }
    }
}

fn write_offsets(f: &mut Formatter<'_>, kind: &str, offsets: &Option<Range<u64>>) -> FmtResult {
    match offsets {
        Some(offsets) if offsets.end > offsets.start + 1 => write!(
            f,
            "{kind} at file offsets {:#x} to {:#x}: ",
            offsets.start, offsets.end
        ),
        Some(offsets) => write!(f, "{kind} at file offset {:#x}: ", offsets.start),
        None => Ok(()),
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write_offsets(f, "Error", &self.offsets)?;
        Display::fmt(&self.details, f)
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        Self::new(None, error.into())
    }
}

impl From<Warning> for Error {
    /// Promotes `warning` to an error, for strict mode.
    fn from(warning: Warning) -> Self {
        Self::new(warning.offsets.clone(), ErrorDetails::Strict(warning))
    }
}

/// Details of an [Error].
#[derive(ThisError, Debug)]
pub enum ErrorDetails {
    /// Not an SPSS system file.
    #[error("Not an SPSS system file.")]
    NotASystemFile,

    /// Encrypted.
    #[error("This system file is encrypted, which is not supported.")]
    Encrypted,

    /// Unknown magic number.
    #[error("Unknown magic number {0:02x?}.")]
    BadMagic([u8; 4]),

    /// I/O error.
    #[error("I/O error ({0}).")]
    Io(#[from] IoError),

    /// The compression code is not valid for the magic number.
    #[error("Compression code {code} is not valid in a {magic} file.")]
    BadCompression {
        /// Magic number.
        magic: Magic,
        /// Compression code.
        code: u32,
    },

    /// Floating-point representation other than IEEE 754.
    #[error("This system file uses floating-point representation {0}, but only IEEE 754 (1) is supported.")]
    UnsupportedFloatFormat(i32),

    /// Impossible number of document lines.
    #[error("Document record claims {n} lines, but at most {max} are possible.")]
    BadDocumentLength {
        /// Claimed number of lines.
        n: u32,
        /// Maximum.
        max: u32,
    },

    /// Unknown record type.
    #[error("Unknown record type {0}.")]
    BadRecordType(u32),

    /// Variable width outside `-1..=255`.
    #[error("Variable record has width {0}, which is not in the range -1 to 255.")]
    BadVariableWidth(i32),

    /// Variable label flag other than 0 or 1.
    #[error("Variable record has label flag {0} instead of 0 or 1.")]
    BadVariableLabelCode(u32),

    /// Bad missing value code.
    #[error("Variable record has missing value code {0}, which is not -3, -2, 0, 1, 2, or 3.")]
    BadMissingValueCode(i32),

    /// Impossible number of value labels.
    #[error("Value label record claims {n} labels, but at most {max} are possible.")]
    BadNumberOfValueLabels {
        /// Claimed number.
        n: u32,
        /// Maximum.
        max: u32,
    },

    /// A value label record is not followed by a variable index record.
    #[error("Value label record is followed by record type {0} instead of variable index record type 4.")]
    MissingVariableIndexRecord(u32),

    /// Impossible number of variable indexes.
    #[error("Variable index record claims {n} variables, but at most {max} are possible.")]
    BadNumberOfVarIndexes {
        /// Claimed number.
        n: u32,
        /// Maximum.
        max: u32,
    },

    /// Extension record too large to read.
    #[error("Extension record subtype {subtype} with {count} elements of {size} bytes each is too large.")]
    ExtensionRecordTooLarge {
        /// Subtype.
        subtype: u32,
        /// Element size.
        size: u32,
        /// Number of elements.
        count: u32,
    },

    /// The data ended partway through a case.
    #[error("Unexpected end of file {case_ofs} bytes into case {case_number}, which should be {case_len} bytes long.")]
    EofInCase {
        /// 1-based case number.
        case_number: u64,
        /// Bytes of the case that were read.
        case_ofs: u64,
        /// Expected length of the case.
        case_len: usize,
    },

    /// Compressed data ended partway through a case.
    #[error("Unexpected end of compressed data {case_ofs} bytes and {n_elements} elements into case {case_number}.")]
    EofInCompressedCase {
        /// 1-based case number.
        case_number: u64,
        /// Compressed bytes of the case that were read.
        case_ofs: u64,
        /// Elements of the case that were read.
        n_elements: usize,
    },

    /// Bad ZLIB header.
    #[error("Bad ZLIB header: {0}")]
    ZHeader(#[from] ZHeaderError),

    /// Bad ZLIB trailer.
    #[error("Bad ZLIB trailer: {0}")]
    ZTrailer(#[from] ZTrailerError),

    /// Unusable character encoding.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// A warning, in strict mode.
    #[error("{} (warnings are errors in strict mode)", .0.details)]
    Strict(Warning),
}

/// A problem in a system file that reading can work around.
#[derive(Clone, Debug)]
pub struct Warning {
    /// File offsets of the problem, if known.
    pub offsets: Option<Range<u64>>,

    /// What is wrong.
    pub details: WarningDetails,
}

impl std::error::Error for Warning {}

impl Warning {
    /// Constructs a warning from `offsets` and `details`.
    pub fn new(offsets: Option<Range<u64>>, details: impl Into<WarningDetails>) -> Self {
        Self {
            offsets,
            details: details.into(),
        }
    }
}

impl Display for Warning {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write_offsets(f, "Warning", &self.offsets)?;
        Display::fmt(&self.details, f)
    }
}

/// Details of a [Warning].
#[derive(ThisError, Clone, Debug)]
pub enum WarningDetails {
    /// In the file header.
    #[error("In file header: {0}")]
    Header(#[from] HeaderWarning),

    /// In a record.
    #[error(transparent)]
    Record(#[from] RecordWarning),

    /// In the ZLIB header.
    #[error("In ZLIB header: {0}")]
    ZHeader(#[from] ZHeaderWarning),

    /// In the ZLIB trailer.
    #[error("In ZLIB trailer: {0}")]
    ZlibTrailer(#[from] ZlibTrailerWarning),

    /// In the case data.
    #[error("In case data: {0}")]
    CaseData(#[from] CaseWarning),

    /// In building the dictionary.
    #[error(transparent)]
    Dictionary(#[from] DictionaryWarning),

    /// In identifying the character encoding.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// The first four bytes of a system file.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Magic {
    /// `$FL2`, for an uncompressed or simple-compressed file.
    Sav,

    /// `$FL3`, for a ZLIB-compressed file.
    Zsav,

    /// `$FL2` in EBCDIC, which is not supported.
    Ebcdic,
}

impl Magic {
    /// Returns the bytes of this magic number.
    pub fn bytes(self) -> [u8; 4] {
        match self {
            Magic::Sav => *b"$FL2",
            Magic::Zsav => *b"$FL3",
            Magic::Ebcdic => [0x5b, 0xc6, 0xd3, 0xf2],
        }
    }
}

impl Display for Magic {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Magic::Sav => "$FL2",
            Magic::Zsav => "$FL3",
            Magic::Ebcdic => "EBCDIC $FL2",
        })
    }
}

impl TryFrom<[u8; 4]> for Magic {
    type Error = ErrorDetails;

    fn try_from(bytes: [u8; 4]) -> Result<Self, Self::Error> {
        [Magic::Sav, Magic::Zsav, Magic::Ebcdic]
            .into_iter()
            .find(|magic| magic.bytes() == bytes)
            .ok_or(ErrorDetails::BadMagic(bytes))
    }
}

pub(crate) fn bin_error_to_io(error: BinError) -> IoError {
    match error {
        BinError::Io(error) => error,
        other => IoError::new(ErrorKind::InvalidData, other.to_string()),
    }
}

/// Reads `N` bytes, or returns `None` at end of file.  A partial read is an
/// [ErrorKind::UnexpectedEof] error.
fn try_read_bytes<const N: usize, R: Read>(r: &mut R) -> Result<Option<[u8; N]>, IoError> {
    let mut buf = [0; N];
    let mut n = 0;
    while n < N {
        match r.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(count) => n += count,
            Err(error) if error.kind() == ErrorKind::Interrupted => (),
            Err(error) => return Err(error),
        }
    }
    match n {
        0 => Ok(None),
        _ if n == N => Ok(Some(buf)),
        _ => Err(ErrorKind::UnexpectedEof.into()),
    }
}

fn read_bytes<const N: usize, R: Read>(r: &mut R) -> Result<[u8; N], IoError> {
    let mut buf = [0; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Reads `n` bytes without allocating more than the input provides.
fn read_vec<R: Read>(r: &mut R, n: usize) -> Result<Vec<u8>, IoError> {
    let mut vec = Vec::new();
    r.take(n as u64).read_to_end(&mut vec)?;
    if vec.len() < n {
        return Err(ErrorKind::UnexpectedEof.into());
    }
    Ok(vec)
}

/// A record in a system file, before interpretation.
#[derive(Clone, Debug, Serialize)]
pub enum Record {
    /// Variable record (type 2).
    Variable(VariableRecord),

    /// Value labels (type 3) and the variable index record that follows
    /// (type 4).
    ValueLabel(ValueLabelRecord),

    /// Document record (type 6).
    Document(DocumentRecord),

    /// Machine integer info (type 7, subtype 3).
    IntegerInfo(IntegerInfoRecord),

    /// Machine floating-point info (type 7, subtype 4).
    FloatInfo(FloatInfoRecord),

    /// Variable display parameters (type 7, subtype 11).
    VarDisplay(VarDisplayRecord),

    /// Extended number of cases (type 7, subtype 16).
    NumberOfCases(NumberOfCasesRecord),

    /// Long string value labels (type 7, subtype 21).
    LongStringValueLabels(LongStringValueLabelRecord),

    /// Long string missing values (type 7, subtype 22).
    LongStringMissingValues(LongStringMissingValueRecord),

    /// An extension record that holds text.
    Text(TextRecord),

    /// An extension record with an unknown subtype.
    Other(Extension),

    /// Dictionary termination record (type 999), with its offsets.
    EndOfHeaders(Range<u64>),

    /// ZLIB header.
    ZHeader(ZHeader),

    /// ZLIB trailer.
    ZTrailer(ZTrailer),
}

impl Record {
    /// Reads a record from `reader`.  Returns `None` for an extension record
    /// that was skipped with a warning.
    fn read<R>(
        reader: &mut R,
        endian: Endian,
        warn: &mut dyn FnMut(Warning),
    ) -> Result<Option<Record>, Error>
    where
        R: Read + Seek,
    {
        let start = reader.stream_position()?;
        let rec_type: u32 = endian.parse(read_bytes::<4, _>(reader)?);
        let result = match rec_type {
            2 => VariableRecord::read(reader, start, endian).map(|r| Some(Record::Variable(r))),
            3 => ValueLabelRecord::read(reader, start, endian).map(|r| Some(Record::ValueLabel(r))),
            6 => DocumentRecord::read(reader, start, endian).map(|r| Some(Record::Document(r))),
            7 => Extension::read(reader, start, endian, warn),
            999 => read_bytes::<4, _>(reader)
                .map_err(ErrorDetails::from)
                .map(|_| Some(Record::EndOfHeaders(start..start + 8))),
            _ => Err(ErrorDetails::BadRecordType(rec_type)),
        };
        result.map_err(|details| {
            let end = reader.stream_position().unwrap_or(start);
            Error::new(Some(start..end), details)
        })
    }
}

enum State {
    Headers,
    ZHeader,
    ZTrailer(ZHeader),
    Done,
}

/// Reads the records in a system file, then its cases.
pub struct Reader<'a, R>
where
    R: Read + Seek + 'static,
{
    reader: Option<R>,
    warn: Box<dyn FnMut(Warning) + 'a>,
    header: FileHeader,
    widths: Vec<VarWidth>,
    state: State,
    cases: Option<Cases>,
}

impl<'a, R> Reader<'a, R>
where
    R: Read + Seek + 'static,
{
    /// Reads the file header from `reader` and prepares to read the rest.
    /// Warnings go to `warn` as they are found.
    pub fn new(mut reader: R, mut warn: impl FnMut(Warning) + 'a) -> Result<Self, Error> {
        let header = FileHeader::read(&mut reader, &mut warn)?;
        Ok(Self {
            reader: Some(reader),
            warn: Box::new(warn),
            header,
            widths: Vec::new(),
            state: State::Headers,
            cases: None,
        })
    }

    /// Returns the file header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Returns an iterator over the records that follow the header.
    pub fn records(&mut self) -> Records<'_, 'a, R> {
        Records(self)
    }

    /// Returns the cases.  This only yields data after [Self::records] has
    /// read every record; otherwise it is empty.
    ///
    /// Each value in a case corresponds to a variable record, so a very long
    /// string appears as one value per segment until
    /// [Cases::with_widths] says otherwise.
    pub fn cases(self) -> Cases {
        self.cases.unwrap_or_default()
    }

    fn start_cases(&mut self, ztrailer: Option<&ZTrailer>) -> Result<(), Error> {
        self.state = State::Done;
        let Some(mut reader) = self.reader.take() else {
            return Ok(());
        };
        let offset = reader.stream_position()?;
        let source: Box<dyn Read> = match ztrailer {
            Some(ztrailer) => Box::new(ZlibReader::new(reader, ztrailer)),
            None => Box::new(reader),
        };
        let widths = std::mem::take(&mut self.widths);
        self.cases = Some(Cases::new(source, offset, &self.header).with_widths(widths));
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Record>, Error> {
        let endian = self.header.endian;
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        match self.state {
            State::Headers => {
                let record = loop {
                    if let Some(record) = Record::read(reader, endian, &mut *self.warn)? {
                        break record;
                    }
                };
                match &record {
                    Record::Variable(variable) => {
                        if let Some(width) = VarWidth::from_raw(variable.width) {
                            self.widths.push(width);
                        }
                    }
                    Record::EndOfHeaders(_) if self.header.compression == Some(Compression::ZLib) => {
                        self.state = State::ZHeader;
                    }
                    Record::EndOfHeaders(_) => self.start_cases(None)?,
                    _ => (),
                }
                Ok(Some(record))
            }
            State::ZHeader => {
                let zheader = ZHeader::read(reader, endian, &mut *self.warn)?;
                self.state = State::ZTrailer(zheader.clone());
                Ok(Some(Record::ZHeader(zheader)))
            }
            State::ZTrailer(ref zheader) => {
                let zheader = zheader.clone();
                let ztrailer = ZTrailer::read(
                    reader,
                    endian,
                    self.header.bias,
                    &zheader.inner,
                    &mut *self.warn,
                )?;
                self.start_cases(Some(&ztrailer))?;
                Ok(Some(Record::ZTrailer(ztrailer)))
            }
            State::Done => Ok(None),
        }
    }
}

/// Iterator over the records in a system file, from [Reader::records].
///
/// Iteration stops after the first error.
pub struct Records<'b, 'a, R>(&'b mut Reader<'a, R>)
where
    R: Read + Seek + 'static;

impl<R> Iterator for Records<'_, '_, R>
where
    R: Read + Seek + 'static,
{
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.0.next_record() {
            Ok(record) => record.map(Ok),
            Err(error) => {
                self.0.state = State::Done;
                self.0.reader = None;
                Some(Err(error))
            }
        }
    }
}
