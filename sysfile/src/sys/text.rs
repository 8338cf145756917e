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

//! Parsers for the extension records whose contents are text.
//!
//! These only split the text into its parts.  Checking names and looking up
//! variables is left to the dictionary builder.

use thiserror::Error as ThisError;

use crate::dictionary::CategoryLabels;

/// A syntax error in a text record.  Parsing skips the bad part, or the rest
/// of the record if it can't resynchronize.
#[derive(ThisError, Clone, Debug, PartialEq, Eq)]
pub enum TextWarning {
    /// An entry that should have the form `name=value` doesn't.
    #[error("Missing `=` in {0:?}.")]
    MissingEquals(String),

    /// A very long string length that isn't a number.
    #[error("Invalid string length in {0:?}.")]
    BadLength(String),

    /// Attribute name without values.
    #[error("Missing `(` after attribute name in {0:?}.")]
    MissingParen(String),

    /// Attribute values that run off the end.
    #[error("Values for attribute {0} are not terminated by `)`.")]
    UnterminatedAttribute(String),

    /// Variable attributes without a variable name.
    #[error("Missing `:` after variable name in {0:?}.")]
    MissingColon(String),

    /// Malformed multiple response set.
    #[error("Syntax error in multiple response set ({0}).")]
    MrSet(&'static str),
}

/// Splits `text` into the `short=long` pairs of a long variable names
/// record.
pub fn long_names(text: &str) -> impl Iterator<Item = Result<(&str, &str), TextWarning>> {
    text.split('\t')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once('=')
                .ok_or_else(|| TextWarning::MissingEquals(entry.into()))
        })
}

/// Splits `text` into the `name=width` pairs of a very long strings record.
/// Each pair ends in a null byte.
pub fn very_long_strings(text: &str) -> impl Iterator<Item = Result<(&str, u16), TextWarning>> {
    text.split('\t')
        .map(|entry| entry.trim_end_matches('\0'))
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, width) = entry
                .split_once('=')
                .ok_or_else(|| TextWarning::MissingEquals(entry.into()))?;
            let width = width
                .trim()
                .parse()
                .map_err(|_| TextWarning::BadLength(entry.into()))?;
            Ok((name, width))
        })
}

/// Splits `text` into the variable sets of a variable sets record, one per
/// line, each a name and a list of variable names.
pub fn variable_sets(
    text: &str,
) -> impl Iterator<Item = Result<(&str, Vec<&str>), TextWarning>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let (name, variables) = line
                .split_once('=')
                .ok_or_else(|| TextWarning::MissingEquals(line.into()))?;
            Ok((name.trim(), variables.split_ascii_whitespace().collect()))
        })
}

/// An attribute name and its values.
pub type RawAttribute<'a> = (&'a str, Vec<String>);

/// Parses attributes of the form `name('value'\n'value'\n)` from `input`,
/// stopping at the end of the input or just past `stop`.  Returns the
/// attributes and the remaining input.
fn attributes(
    mut input: &str,
    stop: Option<char>,
) -> Result<(Vec<RawAttribute<'_>>, &str), TextWarning> {
    let mut attributes = Vec::new();
    loop {
        match input.chars().next() {
            None => return Ok((attributes, input)),
            Some(c) if Some(c) == stop => return Ok((attributes, &input[c.len_utf8()..])),
            _ => (),
        }
        let (name, mut rest) = input
            .split_once('(')
            .ok_or_else(|| TextWarning::MissingParen(input.into()))?;
        let mut values = Vec::new();
        loop {
            let (line, tail) = rest
                .split_once('\n')
                .ok_or_else(|| TextWarning::UnterminatedAttribute(name.into()))?;
            let value = line
                .strip_prefix('\'')
                .and_then(|line| line.strip_suffix('\''))
                .unwrap_or(line);
            values.push(value.to_string());
            rest = tail;
            if let Some(tail) = rest.strip_prefix(')') {
                rest = tail;
                break;
            }
        }
        attributes.push((name, values));
        input = rest;
    }
}

/// Parses the contents of a file attributes record.
pub fn file_attributes(text: &str) -> Result<Vec<RawAttribute<'_>>, TextWarning> {
    attributes(text, None).map(|(attributes, _)| attributes)
}

/// Parses the contents of a variable attributes record, which has the form
/// `var:attributes/var:attributes...`.  Returns the variables that parsed,
/// plus the error that stopped parsing, if any.
pub fn variable_attributes(
    mut text: &str,
) -> (Vec<(&str, Vec<RawAttribute<'_>>)>, Option<TextWarning>) {
    let mut variables = Vec::new();
    while !text.is_empty() {
        let Some((name, rest)) = text.split_once(':') else {
            return (variables, Some(TextWarning::MissingColon(text.into())));
        };
        match attributes(rest, Some('/')) {
            Ok((attributes, rest)) => {
                variables.push((name, attributes));
                text = rest;
            }
            Err(error) => return (variables, Some(error)),
        }
    }
    (variables, None)
}

/// The type of a multiple response set, as written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawMrType<'a> {
    /// `C`.
    Category,

    /// `D` or `E`, with the counted value.
    Dichotomy {
        /// The counted value, in the file's encoding.
        value: &'a [u8],

        /// Source of category labels.
        labels: CategoryLabels,
    },
}

/// A multiple response set, as written.  Names and text are still in the
/// file's encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMrSet<'a> {
    /// Set name, starting with `$`.
    pub name: &'a [u8],

    /// Type.
    pub mr_type: RawMrType<'a>,

    /// Label.
    pub label: &'a [u8],

    /// Short names of the variables.
    pub variables: Vec<&'a [u8]>,
}

struct Scanner<'a>(&'a [u8]);

impl<'a> Scanner<'a> {
    fn eat(&mut self, prefix: &[u8]) -> bool {
        match self.0.strip_prefix(prefix) {
            Some(rest) => {
                self.0 = rest;
                true
            }
            None => false,
        }
    }

    fn require(&mut self, prefix: &[u8], error: &'static str) -> Result<(), TextWarning> {
        self.eat(prefix).then_some(()).ok_or(TextWarning::MrSet(error))
    }

    /// Takes bytes up to (not including) the first of `delimiters`, or to the
    /// end of input.
    fn until(&mut self, delimiters: &[u8]) -> &'a [u8] {
        let n = self
            .0
            .iter()
            .position(|b| delimiters.contains(b))
            .unwrap_or(self.0.len());
        let (head, tail) = self.0.split_at(n);
        self.0 = tail;
        head
    }

    /// Takes a string written as a decimal byte count, a space, and that many
    /// bytes.
    fn counted(&mut self) -> Result<&'a [u8], TextWarning> {
        let digits = self.until(b" ");
        self.require(b" ", "missing space after count")?;
        let len = std::str::from_utf8(digits)
            .ok()
            .and_then(|digits| digits.parse::<usize>().ok())
            .ok_or(TextWarning::MrSet("invalid count"))?;
        let (head, tail) = self
            .0
            .split_at_checked(len)
            .ok_or(TextWarning::MrSet("counted string too long"))?;
        self.0 = tail;
        Ok(head)
    }

    fn mr_type(&mut self) -> Result<RawMrType<'a>, TextWarning> {
        if self.eat(b"C") {
            Ok(RawMrType::Category)
        } else if self.eat(b"D") {
            Ok(RawMrType::Dichotomy {
                value: self.counted()?,
                labels: CategoryLabels::VarLabels,
            })
        } else if self.eat(b"E") {
            let use_var_label_as_mrset_label = if self.eat(b" 1 ") {
                false
            } else if self.eat(b" 11 ") {
                true
            } else {
                return Err(TextWarning::MrSet("invalid category label source"));
            };
            Ok(RawMrType::Dichotomy {
                value: self.counted()?,
                labels: CategoryLabels::CountedValues {
                    use_var_label_as_mrset_label,
                },
            })
        } else {
            Err(TextWarning::MrSet("unknown set type"))
        }
    }

    fn mrset(&mut self) -> Result<RawMrSet<'a>, TextWarning> {
        let name = self.until(b"=");
        self.require(b"=", "missing `=`")?;
        let mr_type = self.mr_type()?;
        self.require(b" ", "missing space after type")?;
        let label = self.counted()?;
        let mut variables = Vec::new();
        while !self.0.is_empty() && !self.eat(b"\n") {
            self.require(b" ", "missing space before variable name")?;
            let variable = self.until(b" \n");
            if !variable.is_empty() {
                variables.push(variable);
            }
        }
        while self.eat(b"\n") {}
        Ok(RawMrSet {
            name,
            mr_type,
            label,
            variables,
        })
    }
}

/// Parses the contents of a multiple response sets record.  Returns the sets
/// that parsed, plus the error that stopped parsing, if any.
pub fn mrsets(text: &[u8]) -> (Vec<RawMrSet<'_>>, Option<TextWarning>) {
    let mut scanner = Scanner(text);
    let mut sets = Vec::new();
    while !scanner.0.is_empty() {
        match scanner.mrset() {
            Ok(set) => sets.push(set),
            Err(error) => return (sets, Some(error)),
        }
    }
    (sets, None)
}
