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

//! SAv Construction Kit.
//!
//! Assembles a textual description of a system file into bytes, so that tests
//! can describe odd or broken files compactly.  The input is a sequence of
//! data items, each followed by a semicolon.  A data item is one of:
//!
//!   - An integer in decimal or in hexadecimal prefixed by `0x`.  Output as a
//!     32-bit integer.
//!
//!   - A floating-point number, which must contain `.`.  Output as a 64-bit
//!     IEEE 754 number.
//!
//!   - A string in double quotes, output literally.  Strings have no escapes
//!     and may not span lines.
//!
//!   - `s<n>` followed by a string, output padded with spaces to `<n>` bytes.
//!
//!   - `i8`, `i16`, or `i64` followed by one or more integers, each output
//!     with the given number of bits.
//!
//!   - `SYSMIS`, `LOWEST`, or `HIGHEST`, output as the corresponding special
//!     64-bit number.
//!
//!   - `ENDIAN`, output as a 32-bit integer 1 for big-endian output or 2 for
//!     little-endian.
//!
//!   - `hex` followed by a string of pairs of hexadecimal digits, with optional
//!     spaces, output as the bytes they represent.
//!
//!   - Parenthesized data items, output in sequence.
//!
//!   - `COUNT` or `COUNT8` followed by parenthesized data items, output as a
//!     32-bit or 8-bit count of the bytes that follow, then the items.
//!
//!   - `name:` marks the current offset as label `name`; `@name` outputs that
//!     offset as a 32-bit integer.  Offsets may be combined as
//!     `@a - @b + 4`.  Labels may be used before they are defined.
//!
//! Any data item may be followed by `* <count>` to repeat it.  `#` starts a
//! comment that runs to the end of the line.  `<` and `>` are ignored, so
//! that they can be used to group items visually.

use std::{collections::HashMap, fmt::Display, iter::repeat_n};

use binrw::Endian;
use num::{Bounded, Zero};
use ordered_float::OrderedFloat;
use thiserror::Error as ThisError;

use crate::endian::ToBytes;

/// An error assembling a system file description.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct Error {
    /// 1-based line number in the input.
    pub line: usize,

    /// Description of the problem.
    pub message: String,
}

type Result<T> = std::result::Result<T, Error>;

/// Offsets of labels.  A label that is referenced but not yet defined has
/// offset `None`.
type Labels = HashMap<String, Option<u32>>;

/// Assembles `input` into a system file with the given byte order.
pub fn sack(input: &str, endian: Endian) -> Result<Vec<u8>> {
    let first = Assembler::new(input, endian, Labels::new())?.assemble()?;
    if first.labels.is_empty() {
        return Ok(first.output);
    }

    // Forward references to labels are zero in the first pass, so assemble
    // again now that every offset is known.
    if let Some(name) = first
        .labels
        .iter()
        .find_map(|(name, offset)| offset.is_none().then_some(name))
    {
        return Err(Error {
            line: 0,
            message: format!("label {name} used but never defined"),
        });
    }
    Ok(Assembler::new(input, endian, first.labels)?
        .assemble()?
        .output)
}

struct Assembler<'a> {
    lexer: Lexer<'a>,
    labels: Labels,
    output: Vec<u8>,
}

impl<'a> Assembler<'a> {
    fn new(input: &'a str, endian: Endian, labels: Labels) -> Result<Self> {
        Ok(Self {
            lexer: Lexer::new(input, endian)?,
            labels,
            output: Vec::new(),
        })
    }

    fn assemble(mut self) -> Result<Self> {
        while self.lexer.token.is_some() {
            self.item()?;
        }
        Ok(self)
    }

    fn put<T, const N: usize>(&mut self, value: T)
    where
        Endian: ToBytes<T, N>,
    {
        let bytes = self.lexer.endian.to_bytes(value);
        self.output.extend_from_slice(&bytes);
    }

    /// Assembles one data item, including its repeat count and terminating
    /// semicolon.
    fn item(&mut self) -> Result<()> {
        let start = self.output.len();
        match self.lexer.take()? {
            Token::Integer(integer) => {
                if let Ok(integer) = i32::try_from(integer) {
                    self.put(integer);
                } else if let Ok(integer) = u32::try_from(integer) {
                    self.put(integer);
                } else {
                    return Err(self.lexer.error(format!(
                        "{integer} is not in the valid range [{},{}]",
                        i32::MIN,
                        u32::MAX
                    )));
                }
            }
            Token::Float(float) => self.put(float.0),
            Token::I8 => self.integers::<u8, 1>("i8")?,
            Token::I16 => self.integers::<u16, 2>("i16")?,
            Token::I64 => self.integers::<i64, 8>("i64")?,
            Token::String(string) => self.output.extend_from_slice(string.as_bytes()),
            Token::S(size) => {
                let Token::String(string) = self.lexer.take()? else {
                    return Err(self.lexer.error(format!("string expected after 's{size}'")));
                };
                if string.len() > size {
                    return Err(self.lexer.error(format!(
                        "{}-byte string is longer than pad length {size}",
                        string.len()
                    )));
                }
                self.output.extend_from_slice(string.as_bytes());
                self.output.extend(repeat_n(b' ', size - string.len()));
            }
            Token::LParen => self.group()?,
            Token::Count => self.counted::<u32, 4>("COUNT")?,
            Token::Count8 => self.counted::<u8, 1>("COUNT8")?,
            Token::Hex => {
                let Token::String(string) = self.lexer.take()? else {
                    return Err(self.lexer.error(String::from("string expected after 'hex'")));
                };
                let digits = string
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .map(|c| c.to_digit(16))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| self.lexer.error(String::from("invalid digit in hex string")))?;
                if digits.len() % 2 != 0 {
                    return Err(self
                        .lexer
                        .error(String::from("hex string has odd number of digits")));
                }
                self.output
                    .extend(digits.chunks(2).map(|pair| (pair[0] * 16 + pair[1]) as u8));
            }
            Token::Label(name) => {
                self.define_label(name)?;
                return Ok(());
            }
            Token::At(name) => {
                let offset = self.offset_expression(name)?;
                self.put(offset.unwrap_or(0));
            }
            token => return Err(self.lexer.error(format!("unexpected {token:?}"))),
        }

        if self.lexer.token_is(&Token::Asterisk) {
            self.lexer.take()?;
            let count = match self.lexer.take()? {
                Token::Integer(count) if count >= 1 => count,
                _ => {
                    return Err(self
                        .lexer
                        .error(String::from("positive integer expected after '*'")));
                }
            };
            let end = self.output.len();
            for _ in 1..count {
                self.output.extend_from_within(start..end);
            }
        }

        if self.lexer.token_is(&Token::Semicolon) {
            self.lexer.take()?;
        } else if !self.lexer.token_is(&Token::RParen) {
            return Err(self.lexer.error(String::from("';' expected")));
        }
        Ok(())
    }

    /// Assembles items up to and including a closing parenthesis.
    fn group(&mut self) -> Result<()> {
        while !self.lexer.token_is(&Token::RParen) {
            if self.lexer.token.is_none() {
                return Err(self.lexer.error(String::from("')' expected")));
            }
            self.item()?;
        }
        self.lexer.take()?;
        Ok(())
    }

    fn counted<T, const N: usize>(&mut self, name: &str) -> Result<()>
    where
        T: Zero + TryFrom<usize>,
        Endian: ToBytes<T, N>,
    {
        let count_offset = self.output.len();
        self.put(T::zero());
        if !self.lexer.token_is(&Token::LParen) {
            return Err(self.lexer.error(format!("'(' expected after '{name}'")));
        }
        self.lexer.take()?;
        self.group()?;

        let n = self.output.len() - count_offset - N;
        let Ok(count) = T::try_from(n) else {
            return Err(self.lexer.error(format!("{n} bytes is too much for '{name}'")));
        };
        let count = self.lexer.endian.to_bytes(count);
        self.output[count_offset..count_offset + N].copy_from_slice(&count);
        Ok(())
    }

    fn integers<T, const N: usize>(&mut self, name: &str) -> Result<()>
    where
        T: Bounded + Display + TryFrom<i64>,
        Endian: ToBytes<T, N>,
    {
        let mut n = 0;
        while let Some(Token::Integer(integer)) = self.lexer.token.as_ref().map(|(t, _)| t) {
            let integer = *integer;
            let Ok(value) = T::try_from(integer) else {
                return Err(self.lexer.error(format!(
                    "{integer} is not in the valid range [{},{}]",
                    T::min_value(),
                    T::max_value()
                )));
            };
            self.put(value);
            self.lexer.take()?;
            n += 1;
        }
        if n == 0 {
            return Err(self.lexer.error(format!("integer expected after '{name}'")));
        }
        Ok(())
    }

    fn define_label(&mut self, name: String) -> Result<()> {
        let offset = self.output.len() as u32;
        match self.labels.insert(name.clone(), Some(offset)) {
            Some(Some(old)) if old != offset => Err(self.lexer.error(format!(
                "{name}: can't redefine label for offset {old:#x} with offset {offset:#x}"
            ))),
            _ => Ok(()),
        }
    }

    fn label(&mut self, name: String) -> Option<u32> {
        *self.labels.entry(name).or_default()
    }

    /// Evaluates `@name [+|- operand]...`, where each operand is a label or an
    /// integer.  Returns `None` if any label is not yet defined.
    fn offset_expression(&mut self, name: String) -> Result<Option<u32>> {
        let mut value = self.label(name);
        loop {
            let add = if self.lexer.token_is(&Token::Plus) {
                true
            } else if self.lexer.token_is(&Token::Minus) {
                false
            } else {
                return Ok(value);
            };
            self.lexer.take()?;

            let operand = match self.lexer.take()? {
                Token::At(name) => self.label(name),
                Token::Integer(integer) => Some(
                    u32::try_from(integer)
                        .map_err(|_| self.lexer.error(format!("bad offset {integer}")))?,
                ),
                _ => {
                    return Err(self
                        .lexer
                        .error(String::from("expecting @label or integer literal")));
                }
            };

            value = match (value, operand) {
                (Some(a), Some(b)) => Some(
                    if add { a.checked_add(b) } else { a.checked_sub(b) }.ok_or_else(|| {
                        self.lexer
                            .error(String::from("overflow in offset arithmetic"))
                    })?,
                ),
                _ => None,
            };
        }
    }
}

#[derive(PartialEq, Eq, Clone, Debug)]
enum Token {
    Integer(i64),
    Float(OrderedFloat<f64>),
    String(String),
    Semicolon,
    Asterisk,
    LParen,
    RParen,
    I8,
    I16,
    I64,
    S(usize),
    Count,
    Count8,
    Hex,
    Label(String),
    At(String),
    Minus,
    Plus,
}

struct Lexer<'a> {
    input: &'a str,
    token: Option<(Token, &'a str)>,
    line: usize,
    endian: Endian,
}

/// Skips white space and comments at the start of `s`, returning the rest and
/// the number of new-lines skipped.
fn skip_blanks(mut s: &str) -> (&str, usize) {
    let mut n_newlines = 0;
    loop {
        s = s.trim_start_matches([' ', '\t', '\r', '<', '>']);
        if let Some(rest) = s.strip_prefix('#') {
            s = rest.split_once('\n').map_or("", |(_, rest)| rest);
            n_newlines += 1;
        } else if let Some(rest) = s.strip_prefix('\n') {
            s = rest;
            n_newlines += 1;
        } else {
            return (s, n_newlines);
        }
    }
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str, endian: Endian) -> Result<Self> {
        let mut lexer = Self {
            input,
            token: None,
            line: 1,
            endian,
        };
        lexer.token = lexer.next()?;
        Ok(lexer)
    }

    fn error(&self, message: String) -> Error {
        let message = match &self.token {
            Some((_, repr)) => format!("at '{repr}': {message}"),
            None => message,
        };
        Error {
            line: self.line,
            message,
        }
    }

    fn token_is(&self, token: &Token) -> bool {
        self.token.as_ref().is_some_and(|(t, _)| t == token)
    }

    /// Returns the current token and advances to the next one.
    fn take(&mut self) -> Result<Token> {
        let Some((token, _)) = self.token.take() else {
            return Err(self.error(String::from("unexpected end of input")));
        };
        self.token = self.next()?;
        Ok(token)
    }

    fn next(&mut self) -> Result<Option<(Token, &'a str)>> {
        let (s, n_newlines) = skip_blanks(self.input);
        self.line += n_newlines;
        self.input = s;

        let mut chars = s.chars();
        let Some(c) = chars.next() else {
            return Ok(None);
        };
        let (token, rest) = match c {
            c if c.is_ascii_digit() || c == '-' => {
                let len = s
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '-'))
                    .unwrap_or(s.len());
                let (number, rest) = s.split_at(len);
                let token = if number == "-" {
                    Token::Minus
                } else if let Some(digits) = number.strip_prefix("0x") {
                    Token::Integer(i64::from_str_radix(digits, 16).map_err(|error| {
                        self.error(format!("bad integer literal '{number}' ({error})"))
                    })?)
                } else if number.contains('.') {
                    Token::Float(number.parse().map_err(|error| {
                        self.error(format!("bad float literal '{number}' ({error})"))
                    })?)
                } else {
                    Token::Integer(number.parse().map_err(|error| {
                        self.error(format!("bad integer literal '{number}' ({error})"))
                    })?)
                };
                (token, rest)
            }
            '"' => {
                let body = chars.as_str();
                let Some(len) = body.find(['\n', '"']) else {
                    return Err(self.error(String::from("end of input inside string")));
                };
                let (string, rest) = body.split_at(len);
                let Some(rest) = rest.strip_prefix('"') else {
                    return Err(self.error(format!("new-line inside string ({string}...)")));
                };
                (Token::String(string.into()), rest)
            }
            ';' => (Token::Semicolon, chars.as_str()),
            '*' => (Token::Asterisk, chars.as_str()),
            '+' => (Token::Plus, chars.as_str()),
            '(' => (Token::LParen, chars.as_str()),
            ')' => (Token::RParen, chars.as_str()),
            c if c.is_alphabetic() || c == '@' || c == '_' => {
                let len = s
                    .find(|c: char| !(c.is_alphanumeric() || matches!(c, '@' | '.' | '_')))
                    .unwrap_or(s.len());
                let (word, rest) = s.split_at(len);
                if let Some(rest) = rest.strip_prefix(':') {
                    (Token::Label(word.into()), rest)
                } else if let Some(name) = word.strip_prefix('@') {
                    (Token::At(name.into()), rest)
                } else if let Some(size) = word.strip_prefix('s')
                    && let Ok(size) = size.parse()
                {
                    (Token::S(size), rest)
                } else {
                    let token = match word {
                        "i8" => Token::I8,
                        "i16" => Token::I16,
                        "i64" => Token::I64,
                        "SYSMIS" => Token::Float(OrderedFloat(f64::MIN)),
                        "LOWEST" => Token::Float(OrderedFloat(f64::MIN.next_up())),
                        "HIGHEST" => Token::Float(OrderedFloat(f64::MAX)),
                        "ENDIAN" => Token::Integer(match self.endian {
                            Endian::Big => 1,
                            Endian::Little => 2,
                        }),
                        "COUNT" => Token::Count,
                        "COUNT8" => Token::Count8,
                        "hex" => Token::Hex,
                        _ => return Err(self.error(format!("invalid token '{word}'"))),
                    };
                    (token, rest)
                }
            }
            _ => return Err(self.error(format!("invalid input character '{c}'"))),
        };
        self.input = rest;
        Ok(Some((token, &s[..s.len() - rest.len()])))
    }
}

#[cfg(test)]
mod tests {
    use binrw::Endian;

    use crate::sys::sack::sack;

    #[test]
    fn integers_and_strings() {
        let input = r#"
2; i8 1 2; i16 0x0102; s6 "ab"; "cd"; ENDIAN;
"#;
        assert_eq!(
            sack(input, Endian::Big).unwrap(),
            b"\0\0\0\x02\x01\x02\x01\x02ab    cd\0\0\0\x01"
        );
        assert_eq!(
            sack(input, Endian::Little).unwrap(),
            b"\x02\0\0\0\x01\x02\x02\x01ab    cd\x02\0\0\0"
        );
    }

    #[test]
    fn floats() {
        assert_eq!(
            sack("1.0; SYSMIS;", Endian::Little).unwrap(),
            [1.0f64.to_le_bytes(), f64::MIN.to_le_bytes()].concat()
        );
        assert_eq!(
            sack("HIGHEST; LOWEST;", Endian::Big).unwrap(),
            [f64::MAX.to_be_bytes(), f64::MIN.next_up().to_be_bytes()].concat()
        );
    }

    #[test]
    fn count_and_repeat() {
        assert_eq!(
            sack(r#"COUNT8("abc"); i8 7 * 3; (i8 1; i8 2) * 2;"#, Endian::Big).unwrap(),
            b"\x03abc\x07\x07\x07\x01\x02\x01\x02"
        );
        assert_eq!(
            sack(r#"COUNT(hex "de ad be ef");"#, Endian::Little).unwrap(),
            b"\x04\0\0\0\xde\xad\xbe\xef"
        );
    }

    #[test]
    fn labels() {
        assert_eq!(
            sack("@end - @start; start: i8 0 * 3; end: @end + 1;", Endian::Big).unwrap(),
            b"\0\0\0\x03\0\0\0\0\0\0\x08"
        );
    }

    #[test]
    fn errors() {
        assert_eq!(sack("@nowhere;", Endian::Big).unwrap_err().line, 0);
        let error = sack("\n\n1; 2", Endian::Big).unwrap_err();
        assert_eq!(error.line, 3);
        assert!(sack(r#"s2 "abc";"#, Endian::Big).is_err());
        assert!(sack("bogus;", Endian::Big).is_err());
    }

    #[test]
    fn header() {
        let input = r#"
"$FL2"; s60 "$(#) SPSS DATA FILE PSPP synthetic test file";
2; # Layout code
28; # Nominal case size
0; # Not compressed
0; # Not weighted
1; # 1 case.
100.0; # Bias.
"01 Jan 11"; "20:53:52";
"PSPP synthetic test file: "; i8 244; i8 245; i8 246; i8 248; s34 "";
i8 0 *3;
"#;
        assert_eq!(sack(input, Endian::Big).unwrap().len(), 176);
    }
}
