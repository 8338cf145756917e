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

//! Case data.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    io::{empty, Error as IoError, ErrorKind, Read},
    mem::take,
    ops::Range,
};

use binrw::Endian;
use smallvec::SmallVec;
use thiserror::Error as ThisError;

use crate::{
    data::{ByteString, Case, Datum},
    endian::FromBytes,
    sys::raw::{
        bytecode::{Decompressor, Element},
        Compression, Error, ErrorDetails, FileHeader, Warning,
    },
    variable::VarWidth,
};

/// A warning about case data.
#[derive(ThisError, Clone, Debug)]
pub enum CaseWarning {
    /// Compressed spaces in a numeric value.
    #[error("Compressed data has spaces where a number belongs.  Reading them as a number.")]
    CompressedSpacesInNumber,

    /// Compressed number in a string value.
    #[error("Compressed data has number code {code} in a string value.  Using the number's bytes as string data.")]
    CompressedNumberInString {
        /// The opcode.
        code: u8,
    },

    /// The number of cases differs from what the file claims.
    #[error("Expected {expected} cases but found {actual}.")]
    WrongNumberOfCases {
        /// Claimed number of cases.
        expected: u64,
        /// Number of cases read.
        actual: u64,
    },
}

/// Tracks how far into the data a reader has gone.
struct Counter {
    inner: Box<dyn Read>,
    offset: u64,
}

impl Read for Counter {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, IoError> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Where one variable's value sits in a case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Layout {
    Numeric,

    /// A string, in one segment per variable record.  Each segment has up to
    /// 255 bytes of data followed by padding.
    String {
        width: usize,
        segments: SmallVec<[(usize, usize); 1]>,
    },
}

impl Layout {
    pub(crate) fn new(width: VarWidth) -> Self {
        let VarWidth::String(string_width) = width else {
            return Layout::Numeric;
        };
        let mut remaining = string_width as usize;
        let segments = width
            .segments()
            .into_iter()
            .map(|segment| {
                let stored = segment.n_elements() * 8;
                let data = remaining.min(255).min(stored);
                remaining -= data;
                (data, stored - data)
            })
            .collect();
        Layout::String {
            width: string_width as usize,
            segments,
        }
    }

    pub(crate) fn stored_bytes(&self) -> usize {
        match self {
            Layout::Numeric => 8,
            Layout::String { segments, .. } => segments.iter().map(|(d, p)| d + p).sum(),
        }
    }
}

/// Reads cases from the data in a system file.
///
/// Each value corresponds to one entry in [Cases::with_widths].  Warnings
/// collect until [Cases::take_warnings] retrieves them, except in strict mode,
/// where the first one ends reading with an error.
///
/// Offsets in errors and warnings are file offsets for uncompressed and
/// simple-compressed data.  For ZLIB-compressed data, they count
/// decompressed bytes from the start of the ZLIB header.
pub struct Cases {
    reader: Counter,
    layout: Vec<Layout>,
    compression: Option<Compression>,
    bias: f64,
    endian: Endian,
    decompressor: Decompressor,
    done: bool,
    expected_cases: Option<u64>,
    n_cases: u64,
    warnings: Vec<Warning>,
    warned_spaces: bool,
    warned_number: bool,
    strict: bool,
}

impl Debug for Cases {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Cases({} read)", self.n_cases)
    }
}

impl Default for Cases {
    fn default() -> Self {
        Self {
            reader: Counter {
                inner: Box::new(empty()),
                offset: 0,
            },
            layout: Vec::new(),
            compression: None,
            bias: 100.0,
            endian: Endian::Little,
            decompressor: Decompressor::new(),
            done: false,
            expected_cases: None,
            n_cases: 0,
            warnings: Vec::new(),
            warned_spaces: false,
            warned_number: false,
            strict: false,
        }
    }
}

impl Cases {
    /// Reads cases from `reader`, which is positioned at file offset `offset`,
    /// for a file with `header`.
    pub(super) fn new(reader: Box<dyn Read>, offset: u64, header: &FileHeader) -> Self {
        Self {
            reader: Counter {
                inner: reader,
                offset,
            },
            compression: header.compression,
            bias: header.bias,
            endian: header.endian,
            expected_cases: header.n_cases.map(u64::from),
            ..Self::default()
        }
    }

    /// Returns these cases with one value per element of `widths`.
    pub fn with_widths(self, widths: impl IntoIterator<Item = VarWidth>) -> Self {
        Self {
            layout: widths.into_iter().map(Layout::new).collect(),
            ..self
        }
    }

    /// Returns these cases expecting `expected_cases` cases, or any number if
    /// `None`.  A different number draws a warning at the end.
    pub fn with_expected_cases(self, expected_cases: Option<u64>) -> Self {
        Self {
            expected_cases,
            ..self
        }
    }

    /// Returns these cases with strict mode set to `strict`.
    pub fn with_strict(self, strict: bool) -> Self {
        Self { strict, ..self }
    }

    /// Returns and forgets the warnings so far.
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        take(&mut self.warnings)
    }

    fn warn_once(&mut self, offsets: Range<u64>, warning: CaseWarning) {
        let warned = match warning {
            CaseWarning::CompressedSpacesInNumber => &mut self.warned_spaces,
            _ => &mut self.warned_number,
        };
        if !*warned {
            *warned = true;
            self.warnings.push(Warning::new(Some(offsets), warning));
        }
    }

    fn read_plain(&mut self, layout: &[Layout]) -> Result<Option<Case>, Error> {
        let start = self.reader.offset;
        let case_len = layout.iter().map(Layout::stored_bytes).sum();
        let mut raw = vec![0; case_len];
        let mut n = 0;
        while n < case_len {
            match self.reader.read(&mut raw[n..]) {
                Ok(0) => break,
                Ok(count) => n += count,
                Err(error) if error.kind() == ErrorKind::Interrupted => (),
                Err(error) => return Err(Error::new(Some(start..self.reader.offset), error.into())),
            }
        }
        if n == 0 {
            return Ok(None);
        } else if n < case_len {
            return Err(Error::new(
                Some(start..self.reader.offset),
                ErrorDetails::EofInCase {
                    case_number: self.n_cases + 1,
                    case_ofs: n as u64,
                    case_len,
                },
            ));
        }

        let mut rest = &raw[..];
        let mut values = Vec::with_capacity(layout.len());
        for var in layout {
            let (head, tail) = rest.split_at(var.stored_bytes());
            rest = tail;
            values.push(match var {
                Layout::Numeric => {
                    Datum::Number(self.endian.parse([
                        head[0], head[1], head[2], head[3], head[4], head[5], head[6], head[7],
                    ]))
                }
                Layout::String { width, segments } => {
                    let mut string = Vec::with_capacity(*width);
                    let mut segment = head;
                    for (data, padding) in segments {
                        string.extend_from_slice(&segment[..*data]);
                        segment = &segment[data + padding..];
                    }
                    Datum::String(ByteString(string))
                }
            });
        }
        Ok(Some(Case(values)))
    }

    fn next_element(
        &mut self,
        start: u64,
        n_elements: &mut usize,
    ) -> Result<Option<Element>, Error> {
        let eof = |offset: u64, n_elements: usize, case_number: u64| {
            Error::new(
                Some(start..offset),
                ErrorDetails::EofInCompressedCase {
                    case_number,
                    case_ofs: offset - start,
                    n_elements,
                },
            )
        };
        match self.decompressor.next_element(&mut self.reader) {
            Ok(Some(element)) => {
                *n_elements += 1;
                Ok(Some(element))
            }
            Ok(None) if *n_elements == 0 => Ok(None),
            Ok(None) => Err(eof(self.reader.offset, *n_elements, self.n_cases + 1)),
            Err(error) if error.kind() == ErrorKind::UnexpectedEof => {
                Err(eof(self.reader.offset, *n_elements, self.n_cases + 1))
            }
            Err(error) => Err(Error::new(Some(start..self.reader.offset), error.into())),
        }
    }

    fn read_compressed(&mut self, layout: &[Layout]) -> Result<Option<Case>, Error> {
        let start = self.reader.offset;
        let mut n_elements = 0;
        let mut values = Vec::with_capacity(layout.len());
        for var in layout {
            match var {
                Layout::Numeric => {
                    let Some(element) = self.next_element(start, &mut n_elements)? else {
                        return Ok(None);
                    };
                    let (number, spaces) = element.as_number(self.bias, self.endian);
                    if spaces {
                        let offsets = start..self.reader.offset;
                        self.warn_once(offsets, CaseWarning::CompressedSpacesInNumber);
                    }
                    values.push(Datum::Number(number));
                }
                Layout::String { width, segments } => {
                    let mut string = Vec::with_capacity(*width);
                    for (data, padding) in segments {
                        let mut data = *data;
                        for _ in 0..(data + padding) / 8 {
                            let Some(element) = self.next_element(start, &mut n_elements)? else {
                                return Ok(None);
                            };
                            let (bytes, code) = element.as_string(self.bias, self.endian);
                            if let Some(code) = code {
                                let offsets = start..self.reader.offset;
                                self.warn_once(offsets, CaseWarning::CompressedNumberInString { code });
                            }
                            let n = data.min(8);
                            string.extend_from_slice(&bytes[..n]);
                            data -= n;
                        }
                    }
                    values.push(Datum::String(ByteString(string)));
                }
            }
        }
        Ok(Some(Case(values)))
    }

    fn read_case(&mut self) -> Result<Option<Case>, Error> {
        let layout = take(&mut self.layout);
        let result = match (layout.is_empty(), self.compression) {
            (true, _) => Ok(None),
            (false, None) => self.read_plain(&layout),
            (false, Some(_)) => self.read_compressed(&layout),
        };
        self.layout = layout;
        result
    }

    fn strict_error(&mut self) -> Option<Error> {
        if self.strict && !self.warnings.is_empty() {
            self.done = true;
            Some(self.warnings.remove(0).into())
        } else {
            None
        }
    }
}

impl Iterator for Cases {
    type Item = Result<Case, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = self.read_case();
        if let Some(error) = self.strict_error() {
            return Some(Err(error));
        }
        match result {
            Ok(Some(case)) => {
                self.n_cases += 1;
                Some(Ok(case))
            }
            Ok(None) => {
                self.done = true;
                if let Some(expected) = self.expected_cases
                    && expected != self.n_cases
                {
                    let end = self.reader.offset;
                    self.warnings.push(Warning::new(
                        Some(end..end),
                        CaseWarning::WrongNumberOfCases {
                            expected,
                            actual: self.n_cases,
                        },
                    ));
                }
                self.strict_error().map(Err)
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use binrw::Endian;
    use itertools::Itertools;

    use crate::{
        data::{ByteString, Datum},
        sys::raw::{
            records::{Compression, FileHeader},
            CaseWarning, Cases, ErrorDetails, Magic, WarningDetails,
        },
        variable::VarWidth,
    };

    use super::Layout;

    #[test]
    fn very_long_string_layout() {
        let Layout::String { width, segments } = Layout::new(VarWidth::String(20000)) else {
            unreachable!()
        };
        assert_eq!(width, 20000);
        assert_eq!(segments.len(), 80);
        assert!(segments[..78].iter().all(|segment| *segment == (255, 1)));
        assert_eq!(segments[78], (110, 146));
        assert_eq!(segments[79], (0, 96));
        assert_eq!(
            Layout::new(VarWidth::String(20000)).stored_bytes(),
            VarWidth::String(20000).n_case_elements() * 8
        );
        assert_eq!(Layout::new(VarWidth::String(3)).stored_bytes(), 8);
    }

    fn header(endian: Endian, compression: Option<Compression>, n_cases: Option<u32>) -> FileHeader {
        FileHeader {
            magic: Magic::Sav,
            eye_catcher: ByteString::from("@(#) SPSS DATA FILE"),
            layout_code: 2,
            nominal_case_size: None,
            compression,
            weight_index: None,
            n_cases,
            bias: 100.0,
            creation_date: ByteString::from("01 Jan 25"),
            creation_time: ByteString::from("00:00:00"),
            file_label: ByteString::default(),
            endian,
        }
    }

    fn cases(
        data: Vec<u8>,
        endian: Endian,
        compression: Option<Compression>,
        n_cases: Option<u32>,
    ) -> Cases {
        Cases::new(
            Box::new(Cursor::new(data)),
            0x100,
            &header(endian, compression, n_cases),
        )
        .with_widths([VarWidth::Numeric, VarWidth::String(3)])
    }

    fn expected() -> Vec<Vec<Datum>> {
        vec![
            vec![Datum::Number(Some(1.0)), Datum::from("abc")],
            vec![Datum::Number(Some(2.5)), Datum::from("xyz")],
        ]
    }

    fn bytes(number: f64, endian: Endian) -> [u8; 8] {
        match endian {
            Endian::Big => number.to_be_bytes(),
            Endian::Little => number.to_le_bytes(),
        }
    }

    #[test]
    fn uncompressed() {
        for endian in [Endian::Big, Endian::Little] {
            let mut data = Vec::new();
            for (number, string) in [(1.0, b"abc     "), (2.5, b"xyz     ")] {
                data.extend_from_slice(&bytes(number, endian));
                data.extend_from_slice(string);
            }
            let cases = cases(data, endian, None, Some(2))
                .map_ok(|case| case.0)
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            assert_eq!(cases, expected());
        }
    }

    #[test]
    fn compressed() {
        for endian in [Endian::Big, Endian::Little] {
            let mut data = vec![101, 253, 253, 253, 252, 0, 0, 0];
            data.extend_from_slice(b"abc     ");
            data.extend_from_slice(&bytes(2.5, endian));
            data.extend_from_slice(b"xyz     ");
            let cases = cases(data, endian, Some(Compression::Simple), None)
                .map_ok(|case| case.0)
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            assert_eq!(cases, expected());
        }
    }

    #[test]
    fn compressed_spaces_in_number() {
        let data = vec![254, 254, 254, 254, 252, 0, 0, 0];
        let mut cases = cases(data, Endian::Little, Some(Compression::Simple), None);
        assert!(cases.next().unwrap().is_ok());
        assert!(cases.next().unwrap().is_ok());
        assert!(cases.next().is_none());
        let warnings = cases.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].offsets, Some(0x100..0x108));
        assert!(matches!(
            warnings[0].details,
            WarningDetails::CaseData(CaseWarning::CompressedSpacesInNumber)
        ));
    }

    #[test]
    fn partial_compressed_case() {
        let data = vec![101, 252, 0, 0, 0, 0, 0, 0];
        let mut cases = cases(data, Endian::Little, Some(Compression::Simple), None);
        let error = cases.next().unwrap().unwrap_err();
        assert!(matches!(
            error.details,
            ErrorDetails::EofInCompressedCase {
                n_elements: 1,
                case_number: 1,
                ..
            }
        ));
        assert!(cases.next().is_none());
    }

    #[test]
    fn partial_case() {
        let mut data = Vec::new();
        data.extend_from_slice(&1.0f64.to_le_bytes());
        data.extend_from_slice(b"abc     ");
        data.extend_from_slice(&2.0f64.to_le_bytes());
        data.extend_from_slice(b"ab");
        let mut cases = cases(data, Endian::Little, None, None);
        assert!(cases.next().unwrap().is_ok());
        let error = cases.next().unwrap().unwrap_err();
        assert!(matches!(
            error.details,
            ErrorDetails::EofInCase {
                case_ofs: 10,
                case_len: 16,
                case_number: 2
            }
        ));
        assert_eq!(error.offsets, Some(0x110..0x11a));
        assert!(cases.next().is_none());
    }

    #[test]
    fn wrong_number_of_cases() {
        let mut data = Vec::new();
        data.extend_from_slice(&1.0f64.to_le_bytes());
        data.extend_from_slice(b"abc     ");

        let mut lenient = cases(data.clone(), Endian::Little, None, Some(3));
        assert_eq!(lenient.by_ref().filter(Result::is_ok).count(), 1);
        let warnings = lenient.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].offsets, Some(0x110..0x110));
        assert_eq!(
            warnings[0].to_string(),
            "Warning at file offset 0x110: In case data: Expected 3 cases but found 1."
        );

        let mut strict = cases(data, Endian::Little, None, Some(3)).with_strict(true);
        assert!(strict.next().unwrap().is_ok());
        let error = strict.next().unwrap().unwrap_err();
        assert!(matches!(error.details, ErrorDetails::Strict(_)));
        assert!(strict.next().is_none());
    }
}
