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

//! Simple bytecode compression.
//!
//! Compressed data is a sequence of 8-byte blocks.  Each opcode block holds
//! eight 1-byte codes, processed left to right, and any literal 8-byte values
//! that those codes call for follow the opcode block in order:
//!
//! | Code     | Meaning                                                  |
//! |----------|----------------------------------------------------------|
//! | 0        | Padding, ignored.                                        |
//! | 1..=251  | The number `code - bias`.                                |
//! | 252      | End of data.                                             |
//! | 253      | A literal 8-byte value follows.                          |
//! | 254      | Eight spaces.                                            |
//! | 255      | The system-missing value.                                |
//!
//! ZLIB-compressed system files compress this bytecode stream again, so the
//! same [Decompressor] serves both.

use std::io::{Error as IoError, Read, Write};

use crate::endian::{Endian, FromBytes, ToBytes};

use super::{read_bytes, try_read_bytes};

/// Opcode for a literal 8-byte value.
const LITERAL: u8 = 253;

/// Opcode for eight spaces.
const SPACES: u8 = 254;

/// Opcode for the system-missing value.
const SYSMIS: u8 = 255;

/// Opcode for end of data.
const END: u8 = 252;

/// One decompressed 8-byte element of a case.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Element {
    /// A literal value, stored uncompressed.
    Literal([u8; 8]),

    /// A compressed integer with the given opcode in `1..=251`.
    Integer(u8),

    /// Eight spaces.
    Spaces,

    /// The system-missing value.
    Sysmis,
}

impl Element {
    /// Interprets this element as a number in a file with the given `bias` and
    /// `endian`.  Returns the number (with `None` for system-missing) and
    /// whether the element was compressed spaces, which only make sense in a
    /// string.
    pub fn as_number(self, bias: f64, endian: Endian) -> (Option<f64>, bool) {
        match self {
            Element::Literal(raw) => (endian.parse(raw), false),
            Element::Integer(code) => (Some(code as f64 - bias), false),
            Element::Spaces => (endian.parse([b' '; 8]), true),
            Element::Sysmis => (None, false),
        }
    }

    /// Interprets this element as 8 bytes of string data.  Returns the bytes
    /// and, if the element was a compressed number other than zero, the
    /// opcode, since numbers in strings suggest corruption.
    ///
    /// A compressed zero yields 8 null bytes, the representation of 0.0.
    pub fn as_string(self, bias: f64, endian: Endian) -> ([u8; 8], Option<u8>) {
        let code = match self {
            Element::Literal(raw) => return (raw, None),
            Element::Spaces => return ([b' '; 8], None),
            Element::Integer(code) => code,
            Element::Sysmis => SYSMIS,
        };
        let number = code as f64 - bias;
        (endian.to_bytes(number), (number != 0.0).then_some(code))
    }
}

/// Expands simple-compressed data into a stream of [Element]s.
#[derive(Debug)]
pub struct Decompressor {
    opcodes: [u8; 8],
    next: usize,
    done: bool,
}

impl Default for Decompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Decompressor {
    /// Constructs a decompressor that has not yet read any opcodes.
    pub fn new() -> Self {
        Self {
            opcodes: [0; 8],
            next: 8,
            done: false,
        }
    }

    /// Reads the next element from `reader`.  Returns `Ok(None)` at the end of
    /// data.  Running out of input partway through an opcode block or before a
    /// literal value is an error of kind [UnexpectedEof].
    ///
    /// [UnexpectedEof]: std::io::ErrorKind::UnexpectedEof
    pub fn next_element<R>(&mut self, reader: &mut R) -> Result<Option<Element>, IoError>
    where
        R: Read,
    {
        while !self.done {
            if self.next >= self.opcodes.len() {
                match try_read_bytes(reader)? {
                    Some(opcodes) => {
                        self.opcodes = opcodes;
                        self.next = 0;
                    }
                    None => {
                        self.done = true;
                        break;
                    }
                }
            }
            let code = self.opcodes[self.next];
            self.next += 1;
            match code {
                0 => (),
                END => self.done = true,
                LITERAL => return Ok(Some(Element::Literal(read_bytes(reader)?))),
                SPACES => return Ok(Some(Element::Spaces)),
                SYSMIS => return Ok(Some(Element::Sysmis)),
                code => return Ok(Some(Element::Integer(code))),
            }
        }
        Ok(None)
    }
}

/// Produces simple-compressed data.
///
/// Codes accumulate in an opcode block, and literal values in a buffer that
/// follows it, until the block fills up.
#[derive(Debug)]
pub struct Compressor {
    bias: f64,
    endian: Endian,
    opcodes: Vec<u8>,
    data: Vec<u8>,
}

impl Compressor {
    /// Constructs a compressor for the given `bias` (normally 100) and byte
    /// order.
    pub fn new(bias: f64, endian: Endian) -> Self {
        Self {
            bias,
            endian,
            opcodes: Vec::with_capacity(8),
            data: Vec::with_capacity(64),
        }
    }

    fn put_opcode<W>(&mut self, writer: &mut W, opcode: u8) -> Result<(), IoError>
    where
        W: Write,
    {
        if self.opcodes.len() >= 8 {
            self.flush(writer)?;
        }
        self.opcodes.push(opcode);
        Ok(())
    }

    fn put_literal<W>(&mut self, writer: &mut W, literal: [u8; 8]) -> Result<(), IoError>
    where
        W: Write,
    {
        self.put_opcode(writer, LITERAL)?;
        self.data.extend_from_slice(&literal);
        Ok(())
    }

    /// Compresses `number`, with `None` meaning system-missing.  Integers in
    /// `1 - bias..=251 - bias` take a single opcode, except for negative zero,
    /// which would read back as positive zero.
    pub fn put_number<W>(&mut self, writer: &mut W, number: Option<f64>) -> Result<(), IoError>
    where
        W: Write,
    {
        match number {
            None => self.put_opcode(writer, SYSMIS),
            Some(number)
                if number == number.trunc()
                    && (1.0 - self.bias..=251.0 - self.bias).contains(&number)
                    && !(number == 0.0 && number.is_sign_negative()) =>
            {
                self.put_opcode(writer, (number + self.bias) as u8)
            }
            Some(number) => self.put_literal(writer, self.endian.to_bytes(number)),
        }
    }

    /// Compresses up to 8 bytes of string data, padding with spaces.
    pub fn put_chunk<W>(&mut self, writer: &mut W, chunk: &[u8]) -> Result<(), IoError>
    where
        W: Write,
    {
        debug_assert!(chunk.len() <= 8);
        if chunk.iter().all(|c| *c == b' ') {
            self.put_opcode(writer, SPACES)
        } else {
            let mut literal = [b' '; 8];
            literal[..chunk.len()].copy_from_slice(chunk);
            self.put_literal(writer, literal)
        }
    }

    /// Writes out a partially filled opcode block, if any, padded with zeros.
    pub fn flush<W>(&mut self, writer: &mut W) -> Result<(), IoError>
    where
        W: Write,
    {
        if !self.opcodes.is_empty() {
            self.opcodes.resize(8, 0);
            writer.write_all(&self.opcodes)?;
            writer.write_all(&self.data)?;
            self.opcodes.clear();
            self.data.clear();
        }
        Ok(())
    }
}
