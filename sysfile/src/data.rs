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

//! Values in cases.

use std::{
    borrow::Cow,
    cmp::Ordering,
    fmt::{Debug, Formatter, Result as FmtResult},
    hash::{Hash, Hasher},
    str::from_utf8,
};

use encoding_rs::{mem::decode_latin1, Encoding};
use ordered_float::OrderedFloat;
use serde::{Serialize, Serializer};

use crate::variable::VarWidth;

/// Bytes of string data, in whatever encoding the file uses.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteString(pub Vec<u8>);

impl ByteString {
    /// Returns the bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Truncates or pads with spaces to `len` bytes.
    pub fn resize(&mut self, len: usize) {
        self.0.resize(len, b' ');
    }

    /// Returns a copy resized to `len` bytes.
    pub fn resized(mut self, len: usize) -> Self {
        self.resize(len);
        self
    }

    /// Drops trailing spaces.
    pub fn trim_end(&mut self) {
        let len = self.0.iter().rposition(|c| *c != b' ').map_or(0, |i| i + 1);
        self.0.truncate(len);
    }

    /// Decodes the bytes as `encoding`.
    pub fn decode(&self, encoding: &'static Encoding) -> Cow<'_, str> {
        encoding.decode_without_bom_handling(&self.0).0
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for ByteString {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl From<&str> for ByteString {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl Debug for ByteString {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match from_utf8(&self.0) {
            Ok(s) => write!(f, "{s:?}"),
            Err(_) => write!(f, "{:?}", decode_latin1(&self.0)),
        }
    }
}

impl Serialize for ByteString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match from_utf8(&self.0) {
            Ok(s) => serializer.serialize_str(s),
            Err(_) => serializer.serialize_bytes(&self.0),
        }
    }
}

/// A numeric or string value.
///
/// Numbers have a total order in which all NaNs are equal and `-0.0` equals
/// `0.0`, so that data can key a map of value labels.
#[derive(Clone)]
pub enum Datum {
    /// A number, or `None` for the system-missing value.
    Number(Option<f64>),

    /// A string, padded with spaces to its variable's width.
    String(ByteString),
}

impl Datum {
    /// Returns the number, or `None` for a string.
    pub fn as_number(&self) -> Option<Option<f64>> {
        match self {
            Datum::Number(number) => Some(*number),
            Datum::String(_) => None,
        }
    }

    /// Returns the string, or `None` for a number.
    pub fn as_string(&self) -> Option<&ByteString> {
        match self {
            Datum::Number(_) => None,
            Datum::String(s) => Some(s),
        }
    }

    /// Pads or truncates a string datum to `width`.  Numbers are unchanged.
    pub fn resize(&mut self, width: VarWidth) {
        if let (Datum::String(s), VarWidth::String(width)) = (self, width) {
            s.resize(width as usize);
        }
    }

    fn key(&self) -> Result<Option<OrderedFloat<f64>>, &ByteString> {
        match self {
            Datum::Number(number) => Ok(number.map(OrderedFloat)),
            Datum::String(s) => Err(s),
        }
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Datum {}

impl PartialOrd for Datum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Datum {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for Datum {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl Debug for Datum {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Datum::Number(Some(number)) => write!(f, "{number:?}"),
            Datum::Number(None) => f.write_str("SYSMIS"),
            Datum::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl Serialize for Datum {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Datum::Number(number) => number.serialize(serializer),
            Datum::String(s) => s.serialize(serializer),
        }
    }
}

impl From<f64> for Datum {
    fn from(value: f64) -> Self {
        Datum::Number(Some(value))
    }
}

impl From<&str> for Datum {
    fn from(value: &str) -> Self {
        Datum::String(value.into())
    }
}

/// One row of data: a [Datum] per variable, in dictionary order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Case(pub Vec<Datum>);
