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

//! Variables and their properties.

use std::fmt::{Display, Formatter, Result as FmtResult};

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use thiserror::Error as ThisError;

use crate::{data::Datum, format::Format, identifier::Identifier};

/// The system-missing value as stored in a file.
pub const SYSMIS: f64 = f64::MIN;

/// The largest finite number, which ends open-ended ranges.
pub const HIGHEST: f64 = f64::MAX;

/// The smallest number other than [SYSMIS], which begins open-ended ranges.
pub const LOWEST: f64 = f64::MIN.next_up();

/// A variable's width.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum VarWidth {
    /// Numeric.
    Numeric,

    /// String, with a width in bytes in `1..=32767`.
    String(u16),
}

impl VarWidth {
    /// Maximum width of a string variable.
    pub const MAX_STRING: u16 = 32767;

    /// Bytes of data in each segment of a very long string but the last.
    pub const SEGMENT_SIZE: u16 = 252;

    /// Interprets the width field of a variable record: 0 for numeric, or a
    /// string width up to 255.  Continuation records (-1) have no width.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Numeric),
            1..=255 => Some(Self::String(raw as u16)),
            _ => None,
        }
    }

    /// Returns the width field for a variable record.
    pub fn to_raw(self) -> i32 {
        match self {
            VarWidth::Numeric => 0,
            VarWidth::String(width) => width as i32,
        }
    }

    /// Returns the string width, or `None` if numeric.
    pub fn as_string_width(self) -> Option<usize> {
        match self {
            VarWidth::Numeric => None,
            VarWidth::String(width) => Some(width as usize),
        }
    }

    /// Returns true for a string too wide for a single 8-byte element.
    pub fn is_long_string(self) -> bool {
        matches!(self, VarWidth::String(width) if width > 8)
    }

    /// Returns true for a string too wide for a single variable record.
    pub fn is_very_long_string(self) -> bool {
        matches!(self, VarWidth::String(width) if width > 255)
    }

    /// Returns the widths of the variable records that store this width.
    ///
    /// A very long string of width `w` takes `ceil(w / 252)` segments.  Every
    /// segment but the last has width 255 and carries 252 bytes of data; the
    /// last carries the rest.
    pub fn segments(self) -> Vec<VarWidth> {
        match self {
            VarWidth::String(width) if width > 255 => {
                let n = width.div_ceil(Self::SEGMENT_SIZE);
                let last = width - (n - 1) * Self::SEGMENT_SIZE;
                let mut segments = vec![VarWidth::String(255); n as usize - 1];
                segments.push(VarWidth::String(last));
                segments
            }
            _ => vec![self],
        }
    }

    /// Returns the number of 8-byte elements a value of a variable record
    /// with this width occupies in a case, which is also the number of
    /// variable records it needs.
    pub fn n_elements(self) -> usize {
        match self {
            VarWidth::Numeric => 1,
            VarWidth::String(width) => (width as usize).div_ceil(8),
        }
    }

    /// Returns the number of 8-byte elements for a variable of this width,
    /// counting every segment.
    pub fn n_case_elements(self) -> usize {
        self.segments().into_iter().map(Self::n_elements).sum()
    }

    /// Returns the narrower of two widths of the same type.
    pub fn narrower(a: VarWidth, b: VarWidth) -> Option<VarWidth> {
        match (a, b) {
            (VarWidth::Numeric, VarWidth::Numeric) => Some(VarWidth::Numeric),
            (VarWidth::String(a), VarWidth::String(b)) => Some(VarWidth::String(a.min(b))),
            _ => None,
        }
    }

    /// Returns the display width that a new variable of this width gets.
    pub fn default_display_width(self) -> u32 {
        match self {
            VarWidth::Numeric => 8,
            VarWidth::String(width) => width.min(32) as u32,
        }
    }
}

impl Display for VarWidth {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            VarWidth::Numeric => f.write_str("numeric"),
            VarWidth::String(width) => write!(f, "{width}-byte string"),
        }
    }
}

/// Level of measurement.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Measure {
    /// Unordered categories.
    Nominal,

    /// Ordered categories.
    Ordinal,

    /// Continuous values.
    Scale,
}

impl Measure {
    /// Decodes a display record measure, where 0 means unknown.
    pub fn from_code(code: u32) -> Result<Option<Self>, u32> {
        match code {
            0 => Ok(None),
            1 => Ok(Some(Measure::Nominal)),
            2 => Ok(Some(Measure::Ordinal)),
            3 => Ok(Some(Measure::Scale)),
            _ => Err(code),
        }
    }

    /// Encodes `measure` for a display record.
    pub fn code(measure: Option<Self>) -> u32 {
        match measure {
            None => 0,
            Some(Measure::Nominal) => 1,
            Some(Measure::Ordinal) => 2,
            Some(Measure::Scale) => 3,
        }
    }
}

/// Horizontal alignment of displayed values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Alignment {
    /// Flush left.
    Left,
    /// Flush right.
    Right,
    /// Centered.
    Center,
}

impl Alignment {
    /// Decodes a display record alignment.
    pub fn from_code(code: u32) -> Result<Self, u32> {
        match code {
            0 => Ok(Alignment::Left),
            1 => Ok(Alignment::Right),
            2 => Ok(Alignment::Center),
            _ => Err(code),
        }
    }

    /// Encodes for a display record.
    pub fn code(self) -> u32 {
        match self {
            Alignment::Left => 0,
            Alignment::Right => 1,
            Alignment::Center => 2,
        }
    }

    /// Returns the alignment that a new variable of `width` gets.
    pub fn default_for_width(width: VarWidth) -> Self {
        match width {
            VarWidth::Numeric => Alignment::Right,
            VarWidth::String(_) => Alignment::Left,
        }
    }
}

/// How a variable is used in analyses, stored as the `$@Role` attribute.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    /// Input variable.
    #[default]
    Input,
    /// Output variable.
    Target,
    /// Both input and output.
    Both,
    /// Neither.
    None,
    /// Divides the data into samples.
    Partition,
    /// Splits the analysis.
    Split,
}

/// An invalid `$@Role` attribute.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
#[error("Invalid role {0:?}.")]
pub struct InvalidRole(pub String);

impl Role {
    /// Name of the attribute that holds the role.
    pub const ATTRIBUTE: &str = "$@Role";

    /// Returns the attribute value for this role.
    pub fn code(self) -> i32 {
        match self {
            Role::Input => 0,
            Role::Target => 1,
            Role::Both => 2,
            Role::None => 3,
            Role::Partition => 4,
            Role::Split => 5,
        }
    }

    /// Parses an attribute value.
    pub fn from_code(code: &str) -> Result<Self, InvalidRole> {
        match code.trim().parse() {
            Ok(0) => Ok(Role::Input),
            Ok(1) => Ok(Role::Target),
            Ok(2) => Ok(Role::Both),
            Ok(3) => Ok(Role::None),
            Ok(4) => Ok(Role::Partition),
            Ok(5) => Ok(Role::Split),
            _ => Err(InvalidRole(code.into())),
        }
    }
}

/// Custom attributes, each with one or more values, in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Attributes(pub IndexMap<Identifier, Vec<String>>);

impl Attributes {
    /// Constructs an empty set of attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns these attributes with `name` set to `values`.
    pub fn with(mut self, name: Identifier, values: Vec<String>) -> Self {
        self.0.insert(name, values);
        self
    }

    /// Returns true if there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Removes the `$@Role` attribute and returns the role it names, if any.
    pub fn take_role(&mut self) -> Result<Option<Role>, InvalidRole> {
        let Ok(name) = Identifier::new(Role::ATTRIBUTE) else {
            return Ok(None);
        };
        match self.0.shift_remove(&name) {
            None => Ok(None),
            Some(values) => match values.as_slice() {
                [value] => Role::from_code(value).map(Some),
                _ => Err(InvalidRole(values.join(","))),
            },
        }
    }
}

/// A range of user-missing numbers.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub enum MissingValueRange {
    /// `low THRU high`.
    In {
        /// Low end.
        low: f64,
        /// High end.
        high: f64,
    },
    /// `low THRU HIGHEST`.
    From {
        /// Low end.
        low: f64,
    },
    /// `LOWEST THRU high`.
    To {
        /// High end.
        high: f64,
    },
}

impl MissingValueRange {
    /// Constructs a range from its ends as stored in a file.  A low end of
    /// [LOWEST] or, as SPSS 21 and later write it, [SYSMIS] is open, as is a
    /// high end of [HIGHEST].
    pub fn new(low: f64, high: f64) -> Self {
        let open_low = low == LOWEST || low == SYSMIS;
        match (open_low, high == HIGHEST) {
            (true, false) => Self::To { high },
            (false, true) => Self::From { low },
            _ => Self::In { low, high },
        }
    }

    /// Returns the ends to store in a file.
    pub fn ends(&self) -> (f64, f64) {
        match *self {
            MissingValueRange::In { low, high } => (low, high),
            MissingValueRange::From { low } => (low, HIGHEST),
            MissingValueRange::To { high } => (LOWEST, high),
        }
    }

    /// Returns true if `number` is in the range.
    pub fn contains(&self, number: f64) -> bool {
        let (low, high) = self.ends();
        (low..=high).contains(&number)
    }
}

/// Invalid user-missing values.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum MissingValuesError {
    /// Too many values.
    #[error("Too many missing values (at most 3, or 1 with a range, are allowed).")]
    TooMany,

    /// Numbers and strings mixed.
    #[error("Missing values mix numbers and strings.")]
    MixedTypes,
}

/// User-missing values of a variable.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MissingValues {
    values: Vec<Datum>,
    range: Option<MissingValueRange>,
}

impl MissingValues {
    /// Checks and constructs missing values.  Only numeric variables may
    /// have a range.
    pub fn new(
        values: Vec<Datum>,
        range: Option<MissingValueRange>,
    ) -> Result<Self, MissingValuesError> {
        let limit = if range.is_some() { 1 } else { 3 };
        if values.len() > limit {
            return Err(MissingValuesError::TooMany);
        }
        let numeric = range.is_some() || values.first().is_some_and(|v| v.as_number().is_some());
        if values.iter().any(|v| v.as_number().is_some() != numeric) {
            return Err(MissingValuesError::MixedTypes);
        }
        Ok(Self { values, range })
    }

    /// Returns the discrete missing values.
    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    /// Returns the range, if any.
    pub fn range(&self) -> Option<&MissingValueRange> {
        self.range.as_ref()
    }

    /// Returns true if there are no missing values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.range.is_none()
    }

    /// Returns true if `datum` is user-missing.  String values compare
    /// ignoring trailing spaces.
    pub fn contains(&self, datum: &Datum) -> bool {
        match datum {
            Datum::Number(Some(number)) => {
                self.range.is_some_and(|range| range.contains(*number))
                    || self.values.contains(datum)
            }
            Datum::Number(None) => false,
            Datum::String(s) => {
                let mut s = s.clone();
                s.trim_end();
                self.values.iter().any(|value| {
                    value.as_string().is_some_and(|value| {
                        let mut value = value.clone();
                        value.trim_end();
                        value == s
                    })
                })
            }
        }
    }

    fn resize(&mut self, width: VarWidth) {
        for value in &mut self.values {
            value.resize(width);
        }
    }
}

/// Labels for values of a variable, in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueLabels(pub IndexMap<Datum, String>);

impl ValueLabels {
    /// Sets the label for `datum`, returning the old label if there was one.
    pub fn insert(&mut self, datum: Datum, label: impl Into<String>) -> Option<String> {
        self.0.insert(datum, label.into())
    }

    /// Returns the label for `datum`.
    pub fn get(&self, datum: &Datum) -> Option<&str> {
        self.0.get(datum).map(String::as_str)
    }

    /// Returns the number of labels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no labels.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn resize(&mut self, width: VarWidth) {
        self.0 = std::mem::take(&mut self.0)
            .into_iter()
            .map(|(mut datum, label)| {
                datum.resize(width);
                (datum, label)
            })
            .collect();
    }
}

impl Serialize for ValueLabels {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(&self.0)
    }
}

/// A variable in a [Dictionary](crate::dictionary::Dictionary).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Variable {
    name: Identifier,

    /// Width.
    pub width: VarWidth,

    /// Format for displaying values.
    pub print_format: Format,

    /// Format for writing values as text.
    pub write_format: Format,

    /// User-missing values.
    pub missing_values: MissingValues,

    /// Variable label.
    pub label: Option<String>,

    /// Value labels.
    pub value_labels: ValueLabels,

    /// Level of measurement, if known.
    pub measure: Option<Measure>,

    /// Role in analyses.
    pub role: Role,

    /// Width of a column that displays the variable.
    pub display_width: u32,

    /// Alignment of displayed values.
    pub alignment: Alignment,

    /// Custom attributes.
    pub attributes: Attributes,

    /// Names of the variable records in a system file, up to 8 bytes each,
    /// one per segment.  Empty until the variable is read or written.
    pub short_names: Vec<Identifier>,
}

impl Variable {
    /// Constructs a variable with default properties for its width.
    pub fn new(name: Identifier, width: VarWidth) -> Self {
        Self {
            name,
            width,
            print_format: Format::default_for_width(width),
            write_format: Format::default_for_width(width),
            missing_values: MissingValues::default(),
            label: None,
            value_labels: ValueLabels::default(),
            measure: width.as_string_width().map(|_| Measure::Nominal),
            role: Role::default(),
            display_width: width.default_display_width(),
            alignment: Alignment::default_for_width(width),
            attributes: Attributes::new(),
            short_names: Vec::new(),
        }
    }

    /// Returns the name.  [Dictionary::rename_var] changes it.
    ///
    /// [Dictionary::rename_var]: crate::dictionary::Dictionary::rename_var
    pub fn name(&self) -> &Identifier {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: Identifier) {
        self.name = name;
    }

    /// Returns the label, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Changes the width of a string variable, adjusting its formats,
    /// missing values, and value labels to match.
    pub fn resize(&mut self, width: VarWidth) {
        self.width = width;
        self.print_format = self.print_format.resized(width);
        self.write_format = self.write_format.resized(width);
        self.missing_values.resize(width);
        self.value_labels.resize(width);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Attributes, MissingValueRange, MissingValues, MissingValuesError, Role, VarWidth,
        HIGHEST, LOWEST, SYSMIS,
    };
    use crate::{data::Datum, identifier::Identifier};

    #[test]
    fn segments() {
        assert_eq!(VarWidth::Numeric.segments(), [VarWidth::Numeric]);
        assert_eq!(VarWidth::String(255).segments(), [VarWidth::String(255)]);
        assert_eq!(
            VarWidth::String(600).segments(),
            [VarWidth::String(255), VarWidth::String(255), VarWidth::String(96)]
        );
        let segments = VarWidth::String(20000).segments();
        assert_eq!(segments.len(), 80);
        assert_eq!(segments[78], VarWidth::String(255));
        assert_eq!(segments[79], VarWidth::String(92));
        assert_eq!(VarWidth::String(20000).n_case_elements(), 79 * 32 + 12);
        assert_eq!(VarWidth::String(9).n_elements(), 2);
        assert_eq!(VarWidth::String(20).to_string(), "20-byte string");
    }

    #[test]
    fn ranges() {
        assert_eq!(
            MissingValueRange::new(LOWEST, 5.0),
            MissingValueRange::To { high: 5.0 }
        );
        assert_eq!(
            MissingValueRange::new(SYSMIS, 5.0),
            MissingValueRange::To { high: 5.0 }
        );
        assert_eq!(
            MissingValueRange::new(1.0, HIGHEST),
            MissingValueRange::From { low: 1.0 }
        );
        assert_eq!(MissingValueRange::new(1.0, HIGHEST).ends(), (1.0, HIGHEST));
        assert!(MissingValueRange::new(1.0, 2.0).contains(1.5));
    }

    #[test]
    fn missing_values() {
        let range = Some(MissingValueRange::new(1.0, 5.0));
        let mv = MissingValues::new(vec![Datum::from(9.0)], range).unwrap();
        assert!(mv.contains(&Datum::from(3.0)));
        assert!(mv.contains(&Datum::from(9.0)));
        assert!(!mv.contains(&Datum::Number(None)));
        assert_eq!(
            MissingValues::new(vec![Datum::from(1.0), Datum::from(2.0)], range),
            Err(MissingValuesError::TooMany)
        );
        assert_eq!(
            MissingValues::new(vec![Datum::from(1.0), Datum::from("a")], None),
            Err(MissingValuesError::MixedTypes)
        );
        let mv = MissingValues::new(vec![Datum::from("ab      ")], None).unwrap();
        assert!(mv.contains(&Datum::from("ab")));
    }

    #[test]
    fn roles() {
        let name = Identifier::new(Role::ATTRIBUTE).unwrap();
        let mut attributes = Attributes::new()
            .with(name.clone(), vec![String::from("1")])
            .with(Identifier::new("x").unwrap(), vec![String::from("y")]);
        assert_eq!(attributes.take_role(), Ok(Some(Role::Target)));
        assert_eq!(attributes.0.len(), 1);
        assert_eq!(attributes.take_role(), Ok(None));

        let mut attributes = Attributes::new().with(name, vec![String::from("9")]);
        assert!(attributes.take_role().is_err());
    }
}
