/* PSPP - a program for statistical analysis.
 * Copyright (C) 2025 Free Software Foundation, Inc.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>. */

use std::{
    borrow::Cow,
    fs::File,
    io::{stdout, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Result};
use binrw::Endian;
use clap::{Args, ValueEnum};
use encoding_rs::Encoding;
use pspp_sysfile::{
    data::{Case, Datum},
    dictionary::Dictionary,
    sys::{
        raw::{records::Compression, Error as ReadError},
        ReadOptions, SystemFileVersion, WriteOptions,
    },
    variable::Variable,
};

use crate::{encoding_arg, plain_text, report};

/// Copies the cases in a system file to CSV or to a new system file.
#[derive(Args, Clone, Debug)]
pub struct Convert {
    /// System file to read.
    input: PathBuf,

    /// File to write.  CSV output goes to stdout if this is omitted.
    output: Option<PathBuf>,

    /// Kind of output.  By default, this follows the output file's extension.
    #[arg(short = 'O', long = "to")]
    target: Option<Target>,

    /// Character encoding of the input, overriding what the file says.
    #[arg(short = 'e', long, value_parser = encoding_arg)]
    encoding: Option<&'static Encoding>,

    /// Stop at the first warning.
    #[arg(long)]
    strict: bool,

    /// Copy no more than this many cases.
    #[arg(short = 'c', long = "cases")]
    max_cases: Option<usize>,

    #[command(flatten, next_help_heading = "CSV output")]
    csv: CsvOptions,

    #[command(flatten, next_help_heading = "System file output")]
    sys: SysOptions,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Target {
    /// Comma-separated values.
    Csv,

    /// SPSS system file.
    Sys,
}

impl Target {
    fn for_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("csv" | "txt") => Ok(Self::Csv),
            Some("sav" | "zsav" | "sys") => Ok(Self::Sys),
            _ => Err(anyhow!(
                "can't tell what kind of file {} should be (use -O)",
                path.display()
            )),
        }
    }
}

#[derive(Args, Clone, Debug)]
struct CsvOptions {
    /// Leave out the line of variable names.
    #[arg(long)]
    no_var_names: bool,

    /// Write user-missing values as blanks, like system-missing values.
    #[arg(long)]
    recode: bool,

    /// Write value labels in place of labeled values.
    #[arg(long)]
    labels: bool,

    /// Character to use as the decimal point.
    #[arg(long, default_value_t = '.')]
    decimal: char,

    /// Field separator.  Defaults to `,`, or to `;` if the decimal point is
    /// `,`.
    #[arg(long)]
    delimiter: Option<char>,

    /// Quote character.
    #[arg(long, default_value_t = '"')]
    qualifier: char,
}

impl CsvOptions {
    fn builder(&self) -> Result<csv::WriterBuilder> {
        let decimal = u8::try_from(self.decimal)?;
        let delimiter = match self.delimiter {
            Some(delimiter) => u8::try_from(delimiter)?,
            None if decimal == b',' => b';',
            None => b',',
        };
        let mut builder = csv::WriterBuilder::new();
        builder
            .delimiter(delimiter)
            .quote(u8::try_from(self.qualifier)?);
        Ok(builder)
    }

    /// Returns the text to write for `datum` as a value of `variable`.
    fn field<'a>(
        &self,
        datum: &'a Datum,
        variable: &'a Variable,
        encoding: &'static Encoding,
    ) -> Cow<'a, str> {
        if self.labels
            && let Some(label) = variable.value_labels.get(datum)
        {
            return Cow::Borrowed(label);
        }
        if self.recode && variable.missing_values.contains(datum) {
            return Cow::Borrowed(" ");
        }
        let text = plain_text(datum, encoding, " ");
        match datum {
            Datum::Number(Some(_)) if self.decimal != '.' => {
                Cow::Owned(text.replace('.', self.decimal.encode_utf8(&mut [0; 4])))
            }
            _ => text,
        }
    }

    fn write(
        &self,
        output: Option<&Path>,
        dictionary: &Dictionary,
        encoding: &'static Encoding,
        cases: impl Iterator<Item = Result<Case, ReadError>>,
    ) -> Result<()> {
        let sink: Box<dyn Write> = match output {
            Some(path) => Box::new(File::create(path)?),
            None => Box::new(stdout()),
        };
        let mut writer = self.builder()?.from_writer(sink);
        let variables = dictionary.variables();
        if !self.no_var_names {
            writer.write_record(variables.iter().map(|variable| variable.name().as_str()))?;
        }
        for case in cases {
            let Case(data) = case?;
            writer.write_record(
                data.iter()
                    .zip(variables)
                    .map(|(datum, variable)| self.field(datum, variable, encoding).into_owned()),
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[derive(Args, Clone, Debug)]
struct SysOptions {
    /// Data compression.
    #[arg(long, default_value = "simple")]
    compression: Option<Compression>,

    /// Byte order, `big` or `little`.  Defaults to the host's.
    #[arg(long, value_parser = endian_arg)]
    endian: Option<Endian>,

    /// Write only 8-byte variable names, as in old versions of SPSS.
    #[arg(long)]
    short_names: bool,
}

fn endian_arg(arg: &str) -> Result<Endian> {
    match arg.to_ascii_lowercase().as_str() {
        "big" | "be" => Ok(Endian::Big),
        "little" | "le" => Ok(Endian::Little),
        _ => bail!("{arg:?} is not a byte order"),
    }
}

impl SysOptions {
    fn options(&self) -> WriteOptions {
        let options = WriteOptions::new().with_compression(self.compression);
        let options = match self.endian {
            Some(endian) => options.with_endian(endian),
            None => options,
        };
        match self.short_names {
            true => options.with_version(SystemFileVersion::V2),
            false => options,
        }
    }

    fn write(
        &self,
        output: &Path,
        dictionary: &Dictionary,
        cases: impl Iterator<Item = Result<Case, ReadError>>,
    ) -> Result<()> {
        let mut writer = self.options().write_file(dictionary, output)?;
        for case in cases {
            writer.write_case(&case?.0)?;
        }
        writer.close()?;
        Ok(())
    }
}

impl Convert {
    pub fn run(self) -> Result<()> {
        let target = match (self.target, &self.output) {
            (Some(target), _) => target,
            (None, Some(output)) => Target::for_path(output)?,
            (None, None) => Target::Csv,
        };

        let system_file = ReadOptions::new()
            .with_encoding(self.encoding)
            .with_strict(self.strict)
            .open_file(&self.input, report)?;
        let encoding = system_file.encodings.data;
        let (dictionary, _, mut cases) = system_file.into_parts();
        let limit = self.max_cases.unwrap_or(usize::MAX);

        match target {
            Target::Csv => self.csv.write(
                self.output.as_deref(),
                &dictionary,
                encoding,
                cases.by_ref().take(limit),
            )?,
            Target::Sys => {
                let Some(output) = &self.output else {
                    bail!("writing a system file requires an output file name")
                };
                self.sys
                    .write(output, &dictionary, cases.by_ref().take(limit))?
            }
        }
        cases.take_warnings().into_iter().for_each(report);
        Ok(())
    }
}
