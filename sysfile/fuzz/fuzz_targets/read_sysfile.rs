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

#![no_main]

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use pspp_sysfile::sys::ReadOptions;

// Reading arbitrary bytes may fail, but it must not panic or hang.  Cases are
// capped because a tiny file can legitimately describe a huge number of them.
fuzz_target!(|data: &[u8]| {
    if let Ok(system_file) = ReadOptions::new().open_reader(Cursor::new(data.to_vec()), |_| ()) {
        for case in system_file.cases.take(1000) {
            if case.is_err() {
                break;
            }
        }
    }
});
