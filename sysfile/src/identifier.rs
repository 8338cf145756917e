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

//! Variable and other names.

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

use encoding_rs::{Encoding, UTF_8};
use serde::{Serialize, Serializer};
use thiserror::Error as ThisError;
use unicase::UniCase;

/// Why a string is not a valid [Identifier].
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum Error {
    /// Empty string.
    #[error("Identifier cannot be empty string.")]
    Empty,

    /// Reserved word.
    #[error("\"{0}\" may not be used as an identifier because it is a reserved word.")]
    Reserved(String),

    /// Invalid first character.
    #[error("\"{0}\" may not be used as an identifier because it begins with disallowed character {1:?}.")]
    BadFirstCharacter(String, char),

    /// Invalid later character.
    #[error("\"{0}\" may not be used as an identifier because it contains disallowed character {1:?}.")]
    BadLaterCharacter(String, char),

    /// Too long.
    #[error("Identifier \"{id}\" is {length} bytes in the encoding in use ({encoding}), which exceeds the {max}-byte limit.")]
    TooLong {
        /// Identifier.
        id: String,
        /// Length in bytes.
        length: usize,
        /// Encoding used for measuring the length.
        encoding: &'static str,
        /// Maximum length.
        max: usize,
    },

    /// Character not representable in the encoding.
    #[error("\"{id}\" may not be used as an identifier because the encoding in use ({encoding}) cannot represent \"{c}\".")]
    NotEncodable {
        /// Identifier.
        id: String,
        /// Encoding.
        encoding: &'static str,
        /// Character that cannot be encoded.
        c: char,
    },
}

static RESERVED_WORDS: [&str; 13] = [
    "ALL", "AND", "BY", "EQ", "GE", "GT", "LE", "LT", "NE", "NOT", "OR", "TO", "WITH",
];

/// Returns true if `s` is one of the words that may never name a variable.
pub fn is_reserved_word(s: &str) -> bool {
    RESERVED_WORDS
        .iter()
        .any(|word| word.eq_ignore_ascii_case(s))
}

fn is_first_char(c: char) -> bool {
    c.is_alphabetic() || matches!(c, '@' | '#' | '$')
}

fn is_later_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '.' | '_' | '@' | '#' | '$')
}

/// Returns `n` in bijective base 26 using letters `A` through `Z`, so that 1
/// is `A`, 26 is `Z`, 27 is `AA`, and so on.
fn base26(mut n: usize) -> String {
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    letters.iter().rev().map(|&b| b as char).collect()
}

/// A case-insensitive name for a variable, a multiple response set, an
/// attribute, or another dictionary object.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Identifier(UniCase<String>);

impl Identifier {
    /// Maximum length of an identifier, in bytes in the dictionary encoding.
    pub const MAX_LEN: usize = 64;

    /// Checks `s` as an identifier in UTF-8.
    pub fn new(s: impl Into<String>) -> Result<Self, Error> {
        Self::from_encoding(s, UTF_8)
    }

    /// Checks `s` as an identifier whose length is measured in `encoding`.
    pub fn from_encoding(s: impl Into<String>, encoding: &'static Encoding) -> Result<Self, Error> {
        let s = s.into();
        let mut chars = s.chars();
        let first = chars.next().ok_or(Error::Empty)?;
        if !is_first_char(first) {
            return Err(Error::BadFirstCharacter(s, first));
        }
        if let Some(c) = chars.find(|c| !is_later_char(*c)) {
            return Err(Error::BadLaterCharacter(s, c));
        }
        if is_reserved_word(&s) {
            return Err(Error::Reserved(s));
        }
        let (encoded, _, unmappable) = encoding.encode(&s);
        if unmappable
            && let Some(c) = s.chars().find(|c| {
                let mut buf = [0; 4];
                encoding.encode(c.encode_utf8(&mut buf)).2
            })
        {
            return Err(Error::NotEncodable {
                id: s,
                encoding: encoding.name(),
                c,
            });
        }
        if encoded.len() > Self::MAX_LEN {
            return Err(Error::TooLong {
                length: encoded.len(),
                id: s,
                encoding: encoding.name(),
                max: Self::MAX_LEN,
            });
        }
        Ok(Self(UniCase::new(s)))
    }

    /// Returns the identifier as a string, in its original case.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns this identifier with suffix `_A`, `_B`, ... for `n` of 1, 2,
    /// ..., continuing with `_AA` after `_Z`.  The base is shortened as
    /// necessary to stay within [Self::MAX_LEN] bytes in `encoding`.
    pub fn with_suffix(&self, n: usize, encoding: &'static Encoding) -> Self {
        let suffix = format!("_{}", base26(n));
        let mut base = self.as_str();
        while !base.is_empty() && encoding.encode(base).0.len() + suffix.len() > Self::MAX_LEN {
            let mut chars = base.chars();
            chars.next_back();
            base = chars.as_str();
        }
        Self(UniCase::new(format!("{base}{suffix}")))
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl Debug for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{:?}", self.as_str())
    }
}

impl Serialize for Identifier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}
