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

//! Building a [Dictionary] from the raw records of a system file.

use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    fs::File,
    io::{BufReader, Read, Seek},
    ops::Range,
    path::Path,
};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use encoding_rs::Encoding;
use itertools::Itertools;
use serde::Serialize;
use thiserror::Error as ThisError;

use crate::{
    data::{ByteString, Datum},
    dictionary::{Dictionary, MultipleResponseSet, MultipleResponseType, VariableSet},
    endian::{Endian, FloatFormat, FromBytes},
    format::{Error as FormatError, Format},
    identifier::{Error as IdError, Identifier},
    sys::{
        encoding::Encodings,
        raw::{
            Cases, DocumentRecord, Error, ErrorDetails, Extension, FileHeader, FloatInfoRecord,
            IntegerInfoRecord, LongStringMissingValueRecord, LongStringValueLabelRecord,
            NumberOfCasesRecord, Reader, Record, TextKind, TextRecord, ValueLabelRecord,
            VarDisplayRecord, VariableRecord, Warning, WarningDetails,
        },
        serialize_endian,
        text::{self, RawAttribute, RawMrSet, RawMrType, TextWarning},
        ProductVersion,
    },
    variable::{
        Alignment, Attributes, InvalidRole, Measure, MissingValueRange, MissingValues,
        MissingValuesError, VarWidth, Variable, HIGHEST, LOWEST, SYSMIS,
    },
};

/// A problem with the dictionary in a system file.  The reader works around
/// each of these.
#[derive(ThisError, Clone, Debug)]
pub enum DictionaryWarning {
    /// A record that may appear only once appeared again.
    #[error("Ignoring duplicate {0} record.")]
    MoreThanOne(&'static str),

    /// Syntax error in a text record.
    #[error("In {kind} record: {warning}")]
    Text {
        /// Which record.
        kind: TextKind,
        /// The problem.
        warning: TextWarning,
    },

    /// A name that isn't a valid identifier.
    #[error("Ignoring invalid name: {0}")]
    InvalidName(IdError),

    /// A variable record whose name isn't a valid identifier.
    #[error("Renaming variable to {new_name}: {error}")]
    InvalidVariableName {
        /// Why the name is invalid.
        error: IdError,
        /// The name given to the variable instead.
        new_name: Identifier,
    },

    /// A variable name already in use.
    #[error("Renaming variable with duplicate name {duplicate_name} to {new_name}.")]
    DuplicateVariableName {
        /// The name in the file.
        duplicate_name: Identifier,
        /// The name given to the variable instead.
        new_name: Identifier,
    },

    /// A print or write format that can't be used.
    #[error("Using {replacement} as {which} format for variable {variable}: {error}")]
    InvalidFormat {
        /// Variable name.
        variable: Identifier,
        /// `"print"` or `"write"`.
        which: &'static str,
        /// The format used instead.
        replacement: Format,
        /// Why the format in the file can't be used.
        error: FormatError,
    },

    /// Missing values that don't fit the variable.
    #[error("Ignoring missing values for variable {variable}: {error}")]
    InvalidMissingValues {
        /// Variable name.
        variable: Identifier,
        /// The problem.
        error: MissingValuesError,
    },

    /// A string variable without all of its continuation records.
    #[error("Variable record {index} is a {width} variable, which needs {expected} continuation records, but only {actual} follow.")]
    MissingContinuation {
        /// 0-based index among the variable records.
        index: usize,
        /// Width of the string variable.
        width: VarWidth,
        /// Number of continuation records needed.
        expected: usize,
        /// Number present.
        actual: usize,
    },

    /// A continuation record that doesn't follow a string variable.
    #[error("Ignoring variable record {0}, a continuation that does not belong to any string variable.")]
    UnexpectedContinuation(usize),

    /// The file header's variable record count disagrees with the file.
    #[error("File header claims {expected} variable records but the file contains {actual}.")]
    WrongVariablePositions {
        /// Number of variable records.
        actual: usize,
        /// Number claimed in the header.
        expected: usize,
    },

    /// Unknown floating-point format code.
    #[error("Unknown floating-point representation {0} in machine integer info record.  Assuming IEEE 754.")]
    UnexpectedFloatFormat(i32),

    /// Byte order in the machine integer info record disagrees with the file
    /// header.
    #[error("Machine integer info record gives byte order {actual}, but the file header implies {expected}.")]
    UnexpectedEndianness {
        /// Value in the record.
        actual: i32,
        /// Value implied by the header.
        expected: i32,
    },

    /// A special value in the machine floating-point info record isn't the
    /// usual one.
    #[error("Machine floating-point info record gives {name} as {actual:?} ({:#018x}) instead of {expected:?} ({:#018x}).", actual.to_bits(), expected.to_bits())]
    UnexpectedFloatValue {
        /// `SYSMIS`, `HIGHEST`, or `LOWEST`.
        name: &'static str,
        /// Value in the record.
        actual: f64,
        /// Expected value.
        expected: f64,
    },

    /// Weight index past the last variable record.
    #[error("Ignoring weight variable index {index}, which is beyond the last variable index {max_index}.")]
    WeightIndexOutOfRange {
        /// 1-based index from the header.
        index: u32,
        /// Number of variable records.
        max_index: usize,
    },

    /// Weight index that points into the middle of a string.
    #[error("Ignoring weight variable index {index}, which is a continuation of string variable {name}.")]
    WeightIndexStringContinuation {
        /// 1-based index from the header.
        index: u32,
        /// The string variable.
        name: Identifier,
    },

    /// Weight variable that isn't numeric.
    #[error("Ignoring string variable {name} (index {index}) as weight variable, because weights must be numeric.")]
    InvalidWeightVar {
        /// 1-based index from the header.
        index: u32,
        /// Variable name.
        name: Identifier,
    },

    /// Value labels for variable indexes that don't exist.
    #[error("Value label record refers to variable indexes {} that are not in the valid range 1 to {max}.", indexes.iter().join(", "))]
    BadValueLabelIndexes {
        /// The indexes.
        indexes: Vec<u32>,
        /// Number of variable records.
        max: usize,
    },

    /// Value labels in record types 3 and 4 for long string variables.
    #[error("Ignoring value labels for long string variables {} in record types 3 and 4.", variables.iter().join(", "))]
    InvalidLongStringValueLabels {
        /// The variables.
        variables: Vec<Identifier>,
    },

    /// More than one label for the same value.
    #[error("Variable {variable} has more than one label for {}.", values.iter().join(", "))]
    DuplicateValueLabels {
        /// Variable name.
        variable: Identifier,
        /// The values, formatted for display.
        values: Vec<String>,
    },

    /// Variable display record of the wrong size.
    #[error("Ignoring variable display record with {count} values, which should be 2 or 3 times the {n_vars} variables.")]
    BadDisplayCount {
        /// Number of values.
        count: usize,
        /// Number of variables.
        n_vars: usize,
    },

    /// Unknown measurement level code.
    #[error("Ignoring unknown measurement level {0}.")]
    InvalidMeasure(u32),

    /// Unknown alignment code.
    #[error("Ignoring unknown alignment {0}.")]
    InvalidAlignment(u32),

    /// A record names a variable that doesn't exist.
    #[error("{context} refers to unknown variable {name}.")]
    UnknownVariable {
        /// The kind of record.
        context: &'static str,
        /// Variable name.
        name: String,
    },

    /// A record applies to a variable that isn't a long string.
    #[error("Ignoring {context} for {name}, which is a {width} variable.")]
    NotLongString {
        /// The kind of record.
        context: &'static str,
        /// Variable name.
        name: Identifier,
        /// The variable's width.
        width: VarWidth,
    },

    /// Too many long string missing values.
    #[error("Using only the first 3 of the {count} long string missing values for {name}.")]
    TooManyMissingValues {
        /// Variable name.
        name: Identifier,
        /// Number of values in the file.
        count: usize,
    },

    /// Invalid multiple response set name.
    #[error("Ignoring multiple response set with invalid name {0:?}.")]
    InvalidMrSetName(String),

    /// Multiple response set variable listed twice.
    #[error("Multiple response set {mr_set} lists variable {variable} more than once.")]
    DuplicateMrSetVariable {
        /// Set name.
        mr_set: Identifier,
        /// Variable name.
        variable: Identifier,
    },

    /// Multiple response set with no variables.
    #[error("Ignoring multiple response set {0} because none of its variables exist.")]
    EmptyMrSet(Identifier),

    /// Multiple response set with only one variable.
    #[error("Ignoring multiple response set {0} because it has only one variable.")]
    OneVarMrSet(Identifier),

    /// Multiple response set with numeric and string variables.
    #[error("Ignoring multiple response set {0} because it mixes numeric and string variables.")]
    MixedMrSet(Identifier),

    /// Counted value that isn't a number.
    #[error("Ignoring multiple response set {mr_set} because its counted value {value:?} is not a number.")]
    InvalidCountedValue {
        /// Set name.
        mr_set: Identifier,
        /// The counted value.
        value: String,
    },

    /// Counted value wider than the variables.
    #[error("Ignoring multiple response set {mr_set} because its {width}-byte counted value {value:?} is wider than its narrowest variable ({max_width} bytes).")]
    TooWideCountedValue {
        /// Set name.
        mr_set: Identifier,
        /// The counted value.
        value: String,
        /// Width of the counted value.
        width: usize,
        /// Width of the narrowest variable.
        max_width: u16,
    },

    /// Very long string width outside `256..=32767`.
    #[error("Ignoring very long string width {width} for variable {name}.")]
    InvalidVeryLongString {
        /// Variable name.
        name: Identifier,
        /// Width.
        width: u16,
    },

    /// Very long string with more segments than there are variables.
    #[error("Very long string variable {name} with width {width} needs {n_segments} segments starting at index {index}, but there are only {n_vars} variables.")]
    VeryLongStringOverflow {
        /// Variable name.
        name: Identifier,
        /// Width.
        width: u16,
        /// Number of segments needed.
        n_segments: usize,
        /// Index of the first segment.
        index: usize,
        /// Number of variables.
        n_vars: usize,
    },

    /// Very long string segment of the wrong width.
    #[error("Very long string variable {name} has segment {segment} of width {actual} instead of {expected}.")]
    VeryLongStringSegment {
        /// Variable name.
        name: Identifier,
        /// 0-based segment number.
        segment: usize,
        /// Width of the segment's variable.
        actual: VarWidth,
        /// Width the segment should have.
        expected: VarWidth,
    },

    /// Unknown role in variable attributes.
    #[error("Ignoring role for variable {variable}: {error}")]
    InvalidRole {
        /// Variable name.
        variable: Identifier,
        /// The problem.
        error: InvalidRole,
    },

    /// Extension record with an unknown subtype.
    #[error("Ignoring unknown extension record subtype {subtype} with {count} elements of {size} bytes each.")]
    UnknownExtensionRecord {
        /// Subtype.
        subtype: u32,
        /// Element size.
        size: u32,
        /// Number of elements.
        count: u32,
    },

    /// Creation date not in `DD MMM YY` form.
    #[error("Creation date {0:?} is not in the form \"DD MMM YY\".  Using 01 Jan 1970.")]
    InvalidCreationDate(String),

    /// Creation time not in `HH:MM:SS` form.
    #[error("Creation time {0:?} is not in the form \"HH:MM:SS\".  Using midnight.")]
    InvalidCreationTime(String),
}

/// Information about a system file that isn't part of its dictionary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// When the file was created.
    pub creation: NaiveDateTime,

    /// Byte order of integers and floating-point numbers.
    #[serde(serialize_with = "serialize_endian")]
    pub endian: Endian,

    /// How case data is compressed.
    pub compression: Option<crate::sys::raw::Compression>,

    /// Number of cases, if known.
    pub n_cases: Option<u64>,

    /// Name of the product that wrote the file.
    pub product: String,

    /// Extra product information, if present.
    pub product_ext: Option<String>,

    /// Version of the product that wrote the file, if known.
    pub version: Option<ProductVersion>,
}

/// Options for reading a system file.
#[derive(Copy, Clone, Debug, Default)]
pub struct ReadOptions {
    /// Character encoding for all text in the file.  If this is `None`, the
    /// encoding is taken from the file itself.
    pub encoding: Option<&'static Encoding>,

    /// If true, the first warning ends reading with an error.
    pub strict: bool,
}

impl ReadOptions {
    /// Constructs [ReadOptions] that read in lenient mode with the file's own
    /// encoding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns these options with the encoding override set to `encoding`.
    pub fn with_encoding(self, encoding: Option<&'static Encoding>) -> Self {
        Self { encoding, ..self }
    }

    /// Returns these options with strict mode set to `strict`.
    pub fn with_strict(self, strict: bool) -> Self {
        Self { strict, ..self }
    }

    /// Opens the system file at `path`.  See [Self::open_reader].
    pub fn open_file<P, F>(self, path: P, warn: F) -> Result<SystemFile, Error>
    where
        P: AsRef<Path>,
        F: FnMut(Warning),
    {
        let reader = BufReader::new(File::open(path)?);
        self.open_reader(reader, warn)
    }

    /// Reads the dictionary from the system file in `reader`, passing each
    /// warning to `warn`.  The cases remain to be read from
    /// [SystemFile::cases].
    pub fn open_reader<R, F>(self, reader: R, mut warn: F) -> Result<SystemFile, Error>
    where
        R: Read + Seek + 'static,
        F: FnMut(Warning),
    {
        let mut raw_warnings = Vec::new();
        let mut reader = Reader::new(reader, |warning| raw_warnings.push(warning))?;
        let records = reader.records().collect::<Result<Vec<_>, _>>()?;
        let header = reader.header().clone();
        let cases = reader.cases();

        let mut warnings = raw_warnings;
        let grouped = Grouped::new(records, &mut warnings);
        let encodings = match self.encoding {
            Some(encoding) => Encodings::uniform(encoding),
            None => grouped.encodings(&mut warnings)?,
        };
        let mut builder = Builder::new(&header, encodings.dictionary, warnings);
        let (dictionary, metadata) = builder.build(&header, grouped)?;
        let warnings = builder.warnings;

        for warning in &warnings {
            warn(warning.clone());
        }
        if self.strict
            && let Some(warning) = warnings.first()
        {
            return Err(warning.clone().into());
        }

        let cases = cases
            .with_widths(dictionary.variables().iter().map(|variable| variable.width))
            .with_expected_cases(metadata.n_cases)
            .with_strict(self.strict);
        Ok(SystemFile {
            dictionary,
            metadata,
            cases,
            warnings,
            encodings,
        })
    }
}

/// A system file whose dictionary has been read.
#[derive(Debug)]
pub struct SystemFile {
    /// The dictionary.
    pub dictionary: Dictionary,

    /// Information about the file that isn't part of the dictionary.
    pub metadata: Metadata,

    /// The cases, not yet read.
    ///
    /// String data in the cases is in [Encodings::data], which can differ
    /// from the dictionary's encoding.
    pub cases: Cases,

    /// Every warning issued while reading the dictionary.  Warnings about the
    /// case data come from [Cases::take_warnings].
    pub warnings: Vec<Warning>,

    /// The file's character encodings.
    pub encodings: Encodings,
}

impl SystemFile {
    /// Returns the dictionary, metadata, and cases.
    pub fn into_parts(self) -> (Dictionary, Metadata, Cases) {
        (self.dictionary, self.metadata, self.cases)
    }

    /// Decodes string `data` from a case.
    pub fn decode_data<'a>(&self, data: &'a ByteString) -> Cow<'a, str> {
        data.decode(self.encodings.data)
    }
}

/// The records of a system file, sorted by kind.
#[derive(Default)]
struct Grouped {
    variables: Vec<VariableRecord>,
    value_labels: Vec<ValueLabelRecord>,
    documents: Vec<DocumentRecord>,
    integer_info: Option<IntegerInfoRecord>,
    float_info: Option<FloatInfoRecord>,
    var_display: Option<VarDisplayRecord>,
    number_of_cases: Option<NumberOfCasesRecord>,
    long_string_value_labels: Vec<LongStringValueLabelRecord>,
    long_string_missing_values: Vec<LongStringMissingValueRecord>,
    texts: HashMap<TextKind, Vec<TextRecord>>,
    encoding: Option<TextRecord>,
    product_info: Option<TextRecord>,
    unknown: Vec<Extension>,
}

/// Returns the first element of `records`, warning about any others.
fn take_first<T>(
    records: Vec<T>,
    name: &'static str,
    offsets: impl Fn(&T) -> Range<u64>,
    warnings: &mut Vec<Warning>,
) -> Option<T> {
    let mut records = records.into_iter();
    let first = records.next();
    for extra in records {
        warnings.push(Warning::new(
            Some(offsets(&extra)),
            DictionaryWarning::MoreThanOne(name),
        ));
    }
    first
}

impl Grouped {
    fn new(records: Vec<Record>, warnings: &mut Vec<Warning>) -> Self {
        let mut grouped = Self::default();
        let mut integer_info = Vec::new();
        let mut float_info = Vec::new();
        let mut var_display = Vec::new();
        let mut number_of_cases = Vec::new();
        for record in records {
            match record {
                Record::Variable(record) => grouped.variables.push(record),
                Record::ValueLabel(record) => grouped.value_labels.push(record),
                Record::Document(record) => grouped.documents.push(record),
                Record::IntegerInfo(record) => integer_info.push(record),
                Record::FloatInfo(record) => float_info.push(record),
                Record::VarDisplay(record) => var_display.push(record),
                Record::NumberOfCases(record) => number_of_cases.push(record),
                Record::LongStringValueLabels(record) => {
                    grouped.long_string_value_labels.push(record)
                }
                Record::LongStringMissingValues(record) => {
                    grouped.long_string_missing_values.push(record)
                }
                Record::Text(record) => grouped.texts.entry(record.kind).or_default().push(record),
                Record::Other(record) => grouped.unknown.push(record),
                Record::EndOfHeaders(_) | Record::ZHeader(_) | Record::ZTrailer(_) => (),
            }
        }

        grouped.integer_info = take_first(
            integer_info,
            "machine integer info",
            |r| r.offsets.clone(),
            warnings,
        );
        grouped.float_info = take_first(
            float_info,
            "machine floating-point info",
            |r| r.offsets.clone(),
            warnings,
        );
        grouped.var_display = take_first(
            var_display,
            "variable display",
            |r| r.offsets.clone(),
            warnings,
        );
        grouped.number_of_cases = take_first(
            number_of_cases,
            "extended number of cases",
            |r| r.offsets.clone(),
            warnings,
        );
        for (kind, name) in [
            (TextKind::Encoding, "character encoding"),
            (TextKind::ProductInfo, "extra product info"),
        ] {
            let records = grouped.texts.remove(&kind).unwrap_or_default();
            let first = take_first(records, name, |r| r.offsets.clone(), warnings);
            match kind {
                TextKind::Encoding => grouped.encoding = first,
                _ => grouped.product_info = first,
            }
        }
        grouped
    }

    fn texts(&mut self, kind: TextKind) -> Vec<TextRecord> {
        self.texts.remove(&kind).unwrap_or_default()
    }

    /// Chooses the file's encodings from its character encoding and machine
    /// integer info records.
    fn encodings(&self, warnings: &mut Vec<Warning>) -> Result<Encodings, Error> {
        let name = self.encoding.as_ref().map(|record| {
            String::from_utf8_lossy(record.text.as_bytes())
                .trim_end_matches(['\0', ' '])
                .to_string()
        });
        let character_code = self.integer_info.as_ref().map(|info| info.character_code);
        let offsets = self
            .encoding
            .as_ref()
            .map(|record| record.offsets.clone())
            .or_else(|| self.integer_info.as_ref().map(|info| info.offsets.clone()))
            .unwrap_or(FileHeader::SIZE..FileHeader::SIZE);
        let (encodings, problem) = Encodings::resolve(name.as_deref(), character_code)
            .map_err(|error| Error::new(Some(offsets.clone()), ErrorDetails::Encoding(error)))?;
        if let Some(problem) = problem {
            warnings.push(Warning::new(Some(offsets), problem));
        }
        Ok(encodings)
    }
}

/// Interprets an 8-byte value from a value label or missing value record for
/// a variable of the given `width`.
fn raw_datum(raw: [u8; 8], width: VarWidth, endian: Endian) -> Datum {
    match width {
        VarWidth::Numeric => Datum::Number(endian.parse(raw)),
        VarWidth::String(width) => Datum::String(ByteString::from(&raw[..]).resized(width as usize)),
    }
}

/// Accumulates a [Dictionary] from grouped records.
struct Builder {
    encoding: &'static Encoding,
    endian: Endian,
    dictionary: Dictionary,

    /// Offsets of the variable record for each variable in `dictionary`.
    var_offsets: Vec<Range<u64>>,

    warnings: Vec<Warning>,
}

impl Builder {
    fn new(header: &FileHeader, encoding: &'static Encoding, warnings: Vec<Warning>) -> Self {
        Self {
            encoding,
            endian: header.endian,
            dictionary: Dictionary::new(encoding),
            var_offsets: Vec::new(),
            warnings,
        }
    }

    fn warn(&mut self, offsets: &Range<u64>, details: impl Into<WarningDetails>) {
        self.warnings.push(Warning::new(Some(offsets.clone()), details));
    }

    fn text_warning(&mut self, record: &TextRecord, warning: TextWarning) {
        self.warn(
            &record.offsets,
            DictionaryWarning::Text {
                kind: record.kind,
                warning,
            },
        );
    }

    fn decode<'b>(&self, bytes: &'b [u8]) -> Cow<'b, str> {
        self.encoding.decode_without_bom_handling(bytes).0
    }

    fn name(&self, s: &str) -> Result<Identifier, IdError> {
        Identifier::from_encoding(s.trim_end(), self.encoding)
    }

    /// Looks up variable `name`, warning if it doesn't exist.
    fn lookup(&mut self, name: &str, context: &'static str, offsets: &Range<u64>) -> Option<usize> {
        let index = self
            .name(name)
            .ok()
            .and_then(|name| self.dictionary.index_of(&name));
        if index.is_none() {
            self.warn(
                offsets,
                DictionaryWarning::UnknownVariable {
                    context,
                    name: name.into(),
                },
            );
        }
        index
    }

    fn build(
        &mut self,
        header: &FileHeader,
        mut grouped: Grouped,
    ) -> Result<(Dictionary, Metadata), Error> {
        let file_label = fix_line_ends(self.decode(header.file_label.as_bytes()).trim_end());
        self.dictionary.file_label = (!file_label.is_empty()).then_some(file_label);
        for record in &grouped.documents {
            for line in &record.lines {
                let line = self.decode(line.as_bytes()).trim_end().to_string();
                self.dictionary.documents.push(line);
            }
        }

        self.check_machine_info(header, &grouped)?;
        let by_position = self.variables(&grouped.variables);
        let n_positions = grouped.variables.len();
        self.weight(header, &by_position, n_positions);
        self.value_labels(header, &grouped.value_labels, &by_position, n_positions);
        if let Some(record) = &grouped.var_display {
            self.var_display(record);
        }

        // These refer to variables by short name, so they come before long
        // names replace them.
        for kind in [TextKind::MultipleResponse, TextKind::ExtendedMultipleResponse] {
            for record in grouped.texts(kind) {
                self.mrsets(&record);
            }
        }
        for record in grouped.texts(TextKind::VeryLongStrings) {
            self.very_long_strings(&record);
        }
        self.long_names(&grouped.texts(TextKind::LongNames));

        for record in grouped.texts(TextKind::FileAttributes) {
            let text = self.decode(record.text.as_bytes()).into_owned();
            match text::file_attributes(&text) {
                Ok(attributes) => {
                    let attributes = self.attributes(attributes, &record.offsets);
                    self.dictionary.attributes.0.extend(attributes.0);
                }
                Err(warning) => self.text_warning(&record, warning),
            }
        }
        for record in grouped.texts(TextKind::VariableAttributes) {
            self.variable_attributes(&record);
        }
        for record in &grouped.long_string_value_labels {
            self.long_string_value_labels(record);
        }
        for record in &grouped.long_string_missing_values {
            self.long_string_missing_values(record);
        }
        for record in grouped.texts(TextKind::VariableSets) {
            self.variable_sets(&record);
        }
        for record in &grouped.unknown {
            self.warn(
                &record.offsets,
                DictionaryWarning::UnknownExtensionRecord {
                    subtype: record.subtype,
                    size: record.size,
                    count: record.count,
                },
            );
        }

        let metadata = self.metadata(header, &grouped);
        let dictionary = std::mem::replace(&mut self.dictionary, Dictionary::new(self.encoding));
        Ok((dictionary, metadata))
    }

    fn check_machine_info(&mut self, header: &FileHeader, grouped: &Grouped) -> Result<(), Error> {
        if let Some(info) = &grouped.integer_info {
            let code = info.floating_point_rep;
            match FloatFormat::from_code(code) {
                Some(FloatFormat::Ieee) => (),
                Some(_) => {
                    return Err(Error::new(
                        Some(info.offsets.clone()),
                        ErrorDetails::UnsupportedFloatFormat(code),
                    ));
                }
                None => self.warn(&info.offsets, DictionaryWarning::UnexpectedFloatFormat(code)),
            }
            let expected = match header.endian {
                Endian::Big => 1,
                Endian::Little => 2,
            };
            if info.endianness != expected {
                self.warn(
                    &info.offsets,
                    DictionaryWarning::UnexpectedEndianness {
                        actual: info.endianness,
                        expected,
                    },
                );
            }
        }

        if let Some(info) = &grouped.float_info {
            // Some writers use SYSMIS for LOWEST.
            for (name, actual, expected, alternate) in [
                ("SYSMIS", info.sysmis, SYSMIS, SYSMIS),
                ("HIGHEST", info.highest, HIGHEST, HIGHEST),
                ("LOWEST", info.lowest, LOWEST, SYSMIS),
            ] {
                if actual != expected && actual != alternate {
                    self.warn(
                        &info.offsets,
                        DictionaryWarning::UnexpectedFloatValue {
                            name,
                            actual,
                            expected,
                        },
                    );
                }
            }
        }

        // SPSS 13 miscounts very long strings in the header.
        let n_records = grouped.variables.len();
        if let Some(expected) = header.nominal_case_size
            && expected as usize != n_records
            && grouped
                .integer_info
                .as_ref()
                .is_none_or(|info| info.version.0 != 13)
        {
            self.warn(
                &FileHeader::NOMINAL_CASE_SIZE_OFFSETS,
                DictionaryWarning::WrongVariablePositions {
                    actual: n_records,
                    expected: expected as usize,
                },
            );
        }
        Ok(())
    }

    fn generate_name(&self, n_generated: &mut usize) -> Identifier {
        loop {
            *n_generated += 1;
            if let Ok(name) = self.name(&format!("VAR{:03}", *n_generated))
                && self.dictionary.index_of(&name).is_none()
            {
                return name;
            }
        }
    }

    /// Adds a variable for each variable record that isn't a continuation.
    /// Returns a map from 0-based record index to dictionary index.
    fn variables(&mut self, records: &[VariableRecord]) -> BTreeMap<usize, usize> {
        let mut by_position = BTreeMap::new();
        let mut n_generated = 0;

        // The string variable being continued, with its width and the number
        // of continuation records it still needs.
        let mut pending: Option<(usize, VarWidth, usize)> = None;

        for (position, record) in records.iter().enumerate() {
            let offsets = &record.offsets;
            let Some(width) = VarWidth::from_raw(record.width) else {
                match &mut pending {
                    Some((_, _, remaining)) if *remaining > 0 => *remaining -= 1,
                    _ => self.warn(offsets, DictionaryWarning::UnexpectedContinuation(position)),
                }
                continue;
            };
            if let Some((index, width, remaining)) = pending.take()
                && remaining > 0
            {
                let expected = width.n_elements() - 1;
                self.warn(
                    &records[index].offsets,
                    DictionaryWarning::MissingContinuation {
                        index,
                        width,
                        expected,
                        actual: expected - remaining,
                    },
                );
            }
            pending = Some((position, width, width.n_elements() - 1));

            let name = match self.name(&self.decode(record.name.as_bytes())) {
                Ok(name) => name,
                Err(error) => {
                    let new_name = self.generate_name(&mut n_generated);
                    self.warn(
                        offsets,
                        DictionaryWarning::InvalidVariableName {
                            error,
                            new_name: new_name.clone(),
                        },
                    );
                    new_name
                }
            };
            let unique = self.dictionary.unique_name(&name);
            if unique != name {
                self.warn(
                    offsets,
                    DictionaryWarning::DuplicateVariableName {
                        duplicate_name: name,
                        new_name: unique.clone(),
                    },
                );
            }

            let mut variable = Variable::new(unique.clone(), width);
            for (raw, which) in [(record.print_format, "print"), (record.write_format, "write")] {
                let (format, error) = Format::decode(raw, width);
                if let Some(error) = error {
                    self.warn(
                        offsets,
                        DictionaryWarning::InvalidFormat {
                            variable: unique.clone(),
                            which,
                            replacement: format,
                            error,
                        },
                    );
                }
                match which {
                    "print" => variable.print_format = format,
                    _ => variable.write_format = format,
                }
            }
            variable.label = record
                .label
                .as_ref()
                .map(|label| self.decode(label.as_bytes()).into_owned());

            let endian = self.endian;
            let values = record
                .missing_values
                .values
                .iter()
                .map(|raw| raw_datum(*raw, width, endian))
                .collect();
            let range = record.missing_values.range.map(|(low, high)| {
                MissingValueRange::new(endian.parse(low), endian.parse(high))
            });
            match MissingValues::new(values, range) {
                Ok(missing_values) => variable.missing_values = missing_values,
                Err(error) => self.warn(
                    offsets,
                    DictionaryWarning::InvalidMissingValues {
                        variable: unique.clone(),
                        error,
                    },
                ),
            }
            variable.short_names = vec![unique];

            if let Ok(index) = self.dictionary.add_var(variable) {
                by_position.insert(position, index);
                self.var_offsets.push(offsets.clone());
            }
        }
        if let Some((index, width, remaining)) = pending
            && remaining > 0
        {
            let expected = width.n_elements() - 1;
            self.warn(
                &records[index].offsets,
                DictionaryWarning::MissingContinuation {
                    index,
                    width,
                    expected,
                    actual: expected - remaining,
                },
            );
        }
        by_position
    }

    fn weight(&mut self, header: &FileHeader, by_position: &BTreeMap<usize, usize>, n: usize) {
        let Some(weight_index) = header.weight_index else {
            return;
        };
        let offsets = FileHeader::WEIGHT_INDEX_OFFSETS;
        let position = weight_index as usize - 1;
        let warning = match by_position.range(..=position).next_back() {
            Some((&start, &index)) if position < n => {
                let name = self.dictionary.variables()[index].name().clone();
                if start != position {
                    DictionaryWarning::WeightIndexStringContinuation {
                        index: weight_index,
                        name,
                    }
                } else if self.dictionary.set_weight(Some(index)).is_err() {
                    DictionaryWarning::InvalidWeightVar {
                        index: weight_index,
                        name,
                    }
                } else {
                    return;
                }
            }
            _ => DictionaryWarning::WeightIndexOutOfRange {
                index: weight_index,
                max_index: n,
            },
        };
        self.warn(&offsets, warning);
    }

    fn value_labels(
        &mut self,
        header: &FileHeader,
        records: &[ValueLabelRecord],
        by_position: &BTreeMap<usize, usize>,
        n_positions: usize,
    ) {
        // ReadStat writes string value labels that become duplicates once
        // they are truncated to the variable's width.
        let from_readstat = header
            .eye_catcher
            .as_bytes()
            .windows(8)
            .any(|window| window == b"ReadStat");

        for record in records {
            let mut targets = Vec::new();
            let mut bad_indexes = Vec::new();
            let mut long_strings = Vec::new();
            for &var_index in &record.var_indexes {
                let index = (var_index as usize)
                    .checked_sub(1)
                    .and_then(|position| by_position.get(&position));
                match index {
                    Some(&index) => {
                        let variable = &self.dictionary.variables()[index];
                        if variable.width.is_long_string() {
                            long_strings.push(variable.name().clone());
                        } else {
                            targets.push(index);
                        }
                    }
                    None => bad_indexes.push(var_index),
                }
            }
            if !bad_indexes.is_empty() {
                self.warn(
                    &record.offsets,
                    DictionaryWarning::BadValueLabelIndexes {
                        indexes: bad_indexes,
                        max: n_positions,
                    },
                );
            }
            if !long_strings.is_empty() {
                self.warn(
                    &record.offsets,
                    DictionaryWarning::InvalidLongStringValueLabels {
                        variables: long_strings,
                    },
                );
            }

            let labels = record
                .labels
                .iter()
                .map(|(raw, label)| (*raw, self.decode(label.as_bytes()).into_owned()))
                .collect::<Vec<_>>();
            for index in targets {
                let endian = self.endian;
                let encoding = self.encoding;
                let Some(variable) = self.dictionary.var_mut(index) else {
                    continue;
                };
                let mut duplicates = Vec::new();
                for (raw, label) in &labels {
                    let datum = raw_datum(*raw, variable.width, endian);
                    if variable
                        .value_labels
                        .insert(datum.clone(), label.clone())
                        .is_some()
                    {
                        duplicates.push(display_datum(&datum, encoding));
                    }
                }
                if !from_readstat && !duplicates.is_empty() {
                    let variable = variable.name().clone();
                    self.warn(
                        &record.offsets,
                        DictionaryWarning::DuplicateValueLabels {
                            variable,
                            values: duplicates,
                        },
                    );
                }
            }
        }
    }

    fn var_display(&mut self, record: &VarDisplayRecord) {
        let n_vars = self.dictionary.variables().len();
        let count = record.values.len();
        let per_var = match count {
            _ if count == 3 * n_vars => 3,
            _ if count == 2 * n_vars => 2,
            _ => {
                self.warn(
                    &record.offsets,
                    DictionaryWarning::BadDisplayCount { count, n_vars },
                );
                return;
            }
        };
        for (index, values) in record.values.chunks_exact(per_var).enumerate() {
            let (measure, display_width, alignment) = match *values {
                [measure, width, alignment] => (measure, Some(width), alignment),
                [measure, alignment] => (measure, None, alignment),
                _ => continue,
            };
            let measure = Measure::from_code(measure).unwrap_or_else(|code| {
                self.warn(&record.offsets, DictionaryWarning::InvalidMeasure(code));
                None
            });
            let alignment = Alignment::from_code(alignment)
                .map_err(|code| self.warn(&record.offsets, DictionaryWarning::InvalidAlignment(code)))
                .ok();
            let Some(variable) = self.dictionary.var_mut(index) else {
                continue;
            };
            if measure.is_some() {
                variable.measure = measure;
            }
            if let Some(display_width) = display_width {
                variable.display_width = display_width;
            }
            if let Some(alignment) = alignment {
                variable.alignment = alignment;
            }
        }
    }

    fn mrsets(&mut self, record: &TextRecord) {
        let (sets, error) = text::mrsets(record.text.as_bytes());
        for set in sets {
            match self.mrset(&set, &record.offsets) {
                Ok(mrset) => self.dictionary.mrsets.push(mrset),
                Err(warning) => self.warn(&record.offsets, warning),
            }
        }
        if let Some(error) = error {
            self.text_warning(record, error);
        }
    }

    fn mrset(
        &mut self,
        set: &RawMrSet,
        offsets: &Range<u64>,
    ) -> Result<MultipleResponseSet, DictionaryWarning> {
        let raw_name = self.decode(set.name).into_owned();
        let name = self
            .name(&raw_name)
            .ok()
            .filter(|name| name.as_str().starts_with('$'))
            .ok_or(DictionaryWarning::InvalidMrSetName(raw_name))?;

        let mut variables = Vec::with_capacity(set.variables.len());
        for short_name in &set.variables {
            let short_name = self.decode(short_name).into_owned();
            let Some(index) = self.lookup(&short_name, "Multiple response set", offsets) else {
                continue;
            };
            if variables.contains(&index) {
                let variable = self.dictionary.variables()[index].name().clone();
                self.warn(
                    offsets,
                    DictionaryWarning::DuplicateMrSetVariable {
                        mr_set: name.clone(),
                        variable,
                    },
                );
            } else {
                variables.push(index);
            }
        }
        match variables.len() {
            0 => return Err(DictionaryWarning::EmptyMrSet(name)),
            1 => return Err(DictionaryWarning::OneVarMrSet(name)),
            _ => (),
        }

        let Some(min_width) = variables
            .iter()
            .map(|index| Some(self.dictionary.variables()[*index].width))
            .reduce(|a, b| VarWidth::narrower(a?, b?))
            .flatten()
        else {
            return Err(DictionaryWarning::MixedMrSet(name));
        };

        let mr_type = match &set.mr_type {
            RawMrType::Category => MultipleResponseType::MultipleCategory,
            RawMrType::Dichotomy { value, labels } => {
                let datum = match min_width {
                    VarWidth::Numeric => {
                        let value = self.decode(value);
                        let number = value.trim().parse::<f64>().map_err(|_| {
                            DictionaryWarning::InvalidCountedValue {
                                mr_set: name.clone(),
                                value: value.to_string(),
                            }
                        })?;
                        Datum::Number(Some(number))
                    }
                    VarWidth::String(max_width) => {
                        let mut value = ByteString::from(*value);
                        value.trim_end();
                        if value.len() > max_width as usize {
                            return Err(DictionaryWarning::TooWideCountedValue {
                                mr_set: name,
                                value: self.decode(value.as_bytes()).into_owned(),
                                width: value.len(),
                                max_width,
                            });
                        }
                        Datum::String(value)
                    }
                };
                MultipleResponseType::MultipleDichotomy {
                    datum,
                    labels: labels.clone(),
                }
            }
        };

        Ok(MultipleResponseSet {
            name,
            label: self.decode(set.label).into_owned(),
            mr_type,
            variables,
        })
    }

    fn very_long_strings(&mut self, record: &TextRecord) {
        let text = self.decode(record.text.as_bytes()).into_owned();
        for entry in text::very_long_strings(&text) {
            match entry {
                Ok((name, width)) => self.merge_segments(name, width, &record.offsets),
                Err(warning) => self.text_warning(record, warning),
            }
        }
    }

    /// Merges the variables that hold the segments of very long string `name`
    /// into a single variable of the given `width`.
    fn merge_segments(&mut self, name: &str, width: u16, offsets: &Range<u64>) {
        let Some(index) = self.lookup(name, "Very long string record", offsets) else {
            return;
        };
        let name = self.dictionary.variables()[index].name().clone();
        let var_width = VarWidth::String(width);
        if !var_width.is_very_long_string() || width > VarWidth::MAX_STRING {
            self.warn(
                offsets,
                DictionaryWarning::InvalidVeryLongString { name, width },
            );
            return;
        }
        let segments = var_width.segments();
        let n_segments = segments.len();
        let n_vars = self.dictionary.variables().len();
        if index + n_segments > n_vars {
            self.warn(
                offsets,
                DictionaryWarning::VeryLongStringOverflow {
                    name,
                    width,
                    n_segments,
                    index,
                    n_vars,
                },
            );
            return;
        }

        let mut short_names = Vec::with_capacity(n_segments);
        for (segment, expected) in segments.into_iter().enumerate() {
            let variable = &self.dictionary.variables()[index + segment];
            let actual = variable.width;
            if actual.n_elements() != expected.n_elements() || actual == VarWidth::Numeric {
                self.warn(
                    offsets,
                    DictionaryWarning::VeryLongStringSegment {
                        name,
                        segment,
                        actual,
                        expected,
                    },
                );
                return;
            }
            short_names.extend(variable.short_names.first().cloned());
        }

        self.dictionary.delete_vars(index + 1..index + n_segments);
        self.var_offsets.drain(index + 1..index + n_segments);
        if let Some(variable) = self.dictionary.var_mut(index) {
            variable.short_names = short_names;
            variable.resize(var_width);
        }
    }

    /// Renames variable `index` to `name`, or to a unique variant of `name`
    /// if another variable already has it.
    fn rename(&mut self, index: usize, name: Identifier, offsets: &Range<u64>) {
        if let Err(name) = self.dictionary.rename_var(index, name) {
            let new_name = self.dictionary.unique_name(&name);
            if self.dictionary.rename_var(index, new_name.clone()).is_ok() {
                self.warn(
                    offsets,
                    DictionaryWarning::DuplicateVariableName {
                        duplicate_name: name,
                        new_name,
                    },
                );
            }
        }
    }

    /// Applies long variable names.  Without any, the short names are
    /// lowercased instead.
    fn long_names(&mut self, records: &[TextRecord]) {
        if records.is_empty() {
            for index in 0..self.dictionary.variables().len() {
                let lower = self.dictionary.variables()[index].name().as_str().to_lowercase();
                let offsets = self.var_offsets[index].clone();
                match self.name(&lower) {
                    Ok(name) => self.rename(index, name, &offsets),
                    Err(error) => self.warn(&offsets, DictionaryWarning::InvalidName(error)),
                }
            }
            return;
        }

        let by_short_name = self
            .dictionary
            .variables()
            .iter()
            .enumerate()
            .filter_map(|(index, variable)| Some((variable.short_names.first()?.clone(), index)))
            .collect::<HashMap<_, _>>();
        for record in records {
            let text = self.decode(record.text.as_bytes()).into_owned();
            for entry in text::long_names(&text) {
                let (short_name, long_name) = match entry {
                    Ok(entry) => entry,
                    Err(warning) => {
                        self.text_warning(record, warning);
                        continue;
                    }
                };
                let index = self
                    .name(short_name)
                    .ok()
                    .and_then(|short_name| by_short_name.get(&short_name).copied());
                let Some(index) = index else {
                    self.warn(
                        &record.offsets,
                        DictionaryWarning::UnknownVariable {
                            context: "Long variable name record",
                            name: short_name.into(),
                        },
                    );
                    continue;
                };
                match self.name(long_name) {
                    Ok(long_name) => self.rename(index, long_name, &record.offsets),
                    Err(error) => self.warn(&record.offsets, DictionaryWarning::InvalidName(error)),
                }
            }
        }
    }

    fn attributes(&mut self, raw: Vec<RawAttribute>, offsets: &Range<u64>) -> Attributes {
        let mut attributes = Attributes::new();
        for (name, values) in raw {
            match self.name(name) {
                Ok(name) => {
                    attributes.0.insert(name, values);
                }
                Err(error) => self.warn(offsets, DictionaryWarning::InvalidName(error)),
            }
        }
        attributes
    }

    fn variable_attributes(&mut self, record: &TextRecord) {
        let text = self.decode(record.text.as_bytes()).into_owned();
        let (variables, error) = text::variable_attributes(&text);
        for (name, raw) in variables {
            let attributes = self.attributes(raw, &record.offsets);
            let Some(index) = self.lookup(name, "Variable attributes record", &record.offsets)
            else {
                continue;
            };
            let Some(variable) = self.dictionary.var_mut(index) else {
                continue;
            };
            variable.attributes.0.extend(attributes.0);
            match variable.attributes.take_role() {
                Ok(Some(role)) => variable.role = role,
                Ok(None) => (),
                Err(error) => {
                    let variable = variable.name().clone();
                    self.warn(
                        &record.offsets,
                        DictionaryWarning::InvalidRole { variable, error },
                    );
                }
            }
        }
        if let Some(error) = error {
            self.text_warning(record, error);
        }
    }

    /// Looks up long string variable `name` for `context`, returning its index
    /// and width.
    fn long_string(
        &mut self,
        name: &ByteString,
        context: &'static str,
        offsets: &Range<u64>,
    ) -> Option<(usize, usize)> {
        let name = self.decode(name.as_bytes()).into_owned();
        let index = self.lookup(&name, context, offsets)?;
        let variable = &self.dictionary.variables()[index];
        match variable.width {
            VarWidth::String(width) if variable.width.is_long_string() => {
                Some((index, width as usize))
            }
            width => {
                let name = variable.name().clone();
                self.warn(
                    offsets,
                    DictionaryWarning::NotLongString {
                        context,
                        name,
                        width,
                    },
                );
                None
            }
        }
    }

    fn long_string_value_labels(&mut self, record: &LongStringValueLabelRecord) {
        for set in &record.labels {
            let Some((index, width)) =
                self.long_string(&set.var_name, "Long string value labels", &record.offsets)
            else {
                continue;
            };
            let labels = set
                .labels
                .iter()
                .map(|(value, label)| {
                    let value = Datum::String(value.clone().resized(width));
                    (value, self.decode(label.as_bytes()).into_owned())
                })
                .collect::<Vec<_>>();
            if let Some(variable) = self.dictionary.var_mut(index) {
                for (value, label) in labels {
                    variable.value_labels.insert(value, label);
                }
            }
        }
    }

    fn long_string_missing_values(&mut self, record: &LongStringMissingValueRecord) {
        for set in &record.values {
            let Some((index, width)) =
                self.long_string(&set.var_name, "Long string missing values", &record.offsets)
            else {
                continue;
            };
            let name = self.dictionary.variables()[index].name().clone();
            if set.values.len() > 3 {
                self.warn(
                    &record.offsets,
                    DictionaryWarning::TooManyMissingValues {
                        name: name.clone(),
                        count: set.values.len(),
                    },
                );
            }
            let values = set
                .values
                .iter()
                .take(3)
                .map(|value| Datum::String(ByteString::from(&value[..]).resized(width)))
                .collect();
            match MissingValues::new(values, None) {
                Ok(missing_values) => {
                    if let Some(variable) = self.dictionary.var_mut(index) {
                        variable.missing_values = missing_values;
                    }
                }
                Err(error) => self.warn(
                    &record.offsets,
                    DictionaryWarning::InvalidMissingValues {
                        variable: name,
                        error,
                    },
                ),
            }
        }
    }

    fn variable_sets(&mut self, record: &TextRecord) {
        let text = self.decode(record.text.as_bytes()).into_owned();
        for entry in text::variable_sets(&text) {
            let (name, names) = match entry {
                Ok(entry) => entry,
                Err(warning) => {
                    self.text_warning(record, warning);
                    continue;
                }
            };
            let variables = names
                .into_iter()
                .filter_map(|variable| self.lookup(variable, "Variable set", &record.offsets))
                .collect();
            self.dictionary.variable_sets.push(VariableSet {
                name: name.to_string(),
                variables,
            });
        }
    }

    fn metadata(&mut self, header: &FileHeader, grouped: &Grouped) -> Metadata {
        let date = String::from_utf8_lossy(header.creation_date.as_bytes()).into_owned();
        let date = NaiveDate::parse_from_str(&date, "%e %b %y").unwrap_or_else(|_| {
            self.warn(
                &FileHeader::CREATION_DATE_OFFSETS,
                DictionaryWarning::InvalidCreationDate(date),
            );
            NaiveDate::default()
        });
        let time = String::from_utf8_lossy(header.creation_time.as_bytes()).into_owned();
        let time = NaiveTime::parse_from_str(&time, "%H:%M:%S").unwrap_or_else(|_| {
            self.warn(
                &FileHeader::CREATION_TIME_OFFSETS,
                DictionaryWarning::InvalidCreationTime(time),
            );
            NaiveTime::default()
        });

        let product = self
            .decode(header.eye_catcher.as_bytes())
            .trim_start_matches("@(#) SPSS DATA FILE")
            .trim()
            .to_string();
        let n_cases = grouped
            .number_of_cases
            .as_ref()
            .map(|record| record.n_cases)
            .filter(|n_cases| *n_cases != u64::MAX)
            .or(header.n_cases.map(u64::from));

        Metadata {
            creation: NaiveDateTime::new(date, time),
            endian: header.endian,
            compression: header.compression,
            n_cases,
            product,
            product_ext: grouped
                .product_info
                .as_ref()
                .map(|record| fix_line_ends(&self.decode(record.text.as_bytes()))),
            version: grouped.integer_info.as_ref().map(|info| info.version),
        }
    }
}

/// Formats `datum` for a warning message.
fn display_datum(datum: &Datum, encoding: &'static Encoding) -> String {
    match datum {
        Datum::Number(Some(number)) => number.to_string(),
        Datum::Number(None) => String::from("SYSMIS"),
        Datum::String(string) => format!("{:?}", string.decode(encoding).trim_end()),
    }
}

/// Converts lone CRs and CR LF pairs in `s` to LF.  Some writers use CR line
/// ends in the file label and product info.
fn fix_line_ends(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}
