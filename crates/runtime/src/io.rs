//! Console and channel I/O.
//!
//! PRINT formatting: numeric items get a leading space when non-negative
//! (the sign position), strings print verbatim, and the statement's
//! separators themselves add nothing. Doubles with integral values print
//! without a decimal point.
//!
//! Channels are 1-based handles into a process-wide table. CLOSE releases
//! a channel; teardown walks the table so an emitted program that never
//! closes still releases its files.

use crate::string::StringDescriptor;
use fb_core::{MAX_CHANNELS, error_code};
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};

/// Format a double the way PRINT and STR$ do: integral values drop the
/// decimal point, everything else uses shortest round-trip notation.
pub fn format_double(v: f64) -> String {
    if v.is_finite() && v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

fn write_stdout(text: &str) {
    let mut out = std::io::stdout().lock();
    // A failed console write is not a BASIC error; drop it.
    let _ = out.write_all(text.as_bytes());
}

/// PRINT item: integer.
#[unsafe(no_mangle)]
pub extern "C" fn basic_print_int(v: i64) {
    if v >= 0 {
        write_stdout(&format!(" {}", v));
    } else {
        write_stdout(&v.to_string());
    }
}

/// PRINT item: double.
#[unsafe(no_mangle)]
pub extern "C" fn basic_print_double(v: f64) {
    let text = format_double(v);
    if text.starts_with('-') {
        write_stdout(&text);
    } else {
        write_stdout(&format!(" {}", text));
    }
}

/// PRINT item: string. Null prints nothing.
///
/// # Safety
/// `s` must be null or a live descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn basic_print_string(s: *mut StringDescriptor) {
    write_stdout(&unsafe { crate::string::to_string(s) });
}

/// PRINT item: a single code point (CHR$ output path).
#[unsafe(no_mangle)]
pub extern "C" fn basic_print_char(code: i64) {
    if let Some(c) = u32::try_from(code).ok().and_then(char::from_u32) {
        write_stdout(&c.to_string());
    }
}

/// End-of-PRINT newline (suppressed by a trailing separator).
#[unsafe(no_mangle)]
pub extern "C" fn basic_print_newline() {
    write_stdout("\n");
}

/// INPUT: read one line from stdin, without the trailing newline.
#[unsafe(no_mangle)]
pub extern "C" fn basic_input_line() -> *mut StringDescriptor {
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    crate::string::from_str(&line)
}

enum Channel {
    In(BufReader<File>),
    Out(File),
}

thread_local! {
    static CHANNELS: RefCell<Vec<Option<Channel>>> =
        RefCell::new((0..MAX_CHANNELS).map(|_| None).collect());
}

fn check_channel(chan: i32, line: i32) -> usize {
    if chan < 1 || chan as usize >= MAX_CHANNELS {
        unsafe { crate::except::basic_throw(error_code::BAD_FILE_CHANNEL, line) };
    }
    chan as usize
}

fn with_channel<R>(chan: i32, line: i32, f: impl FnOnce(&mut Channel) -> R) -> R {
    let idx = check_channel(chan, line);
    CHANNELS.with(|channels| {
        let mut channels = channels.borrow_mut();
        match channels[idx].as_mut() {
            Some(channel) => f(channel),
            None => unsafe { crate::except::basic_throw(error_code::BAD_FILE_CHANNEL, line) },
        }
    })
}

/// OPEN path FOR mode AS #chan. Modes: 0 INPUT, 1 OUTPUT, 2 APPEND.
///
/// # Safety
/// `path` must be a live string descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn basic_open(path: *mut StringDescriptor, mode: i32, chan: i32, line: i32) {
    let idx = check_channel(chan, line);
    let path = unsafe { crate::string::to_string(path) };
    let opened = match mode {
        0 => File::open(&path).map(|f| Channel::In(BufReader::new(f))),
        1 => File::create(&path).map(Channel::Out),
        2 => OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map(Channel::Out),
        _ => unsafe { crate::except::basic_throw(error_code::FILE_IO, line) },
    };
    match opened {
        Ok(channel) => CHANNELS.with(|channels| {
            let mut channels = channels.borrow_mut();
            if channels[idx].is_some() {
                unsafe { crate::except::basic_throw(error_code::BAD_FILE_CHANNEL, line) };
            }
            channels[idx] = Some(channel);
        }),
        Err(_) => unsafe { crate::except::basic_throw(error_code::FILE_IO, line) },
    }
}

/// CLOSE #chan.
#[unsafe(no_mangle)]
pub extern "C" fn basic_close(chan: i32, line: i32) {
    let idx = check_channel(chan, line);
    CHANNELS.with(|channels| channels.borrow_mut()[idx] = None);
}

fn channel_write(chan: i32, line: i32, text: &str) {
    with_channel(chan, line, |channel| match channel {
        Channel::Out(file) => {
            if file.write_all(text.as_bytes()).is_err() {
                unsafe { crate::except::basic_throw(error_code::FILE_IO, line) };
            }
        }
        Channel::In(_) => unsafe { crate::except::basic_throw(error_code::FILE_IO, line) },
    })
}

/// PRINT #chan item: string.
///
/// # Safety
/// `s` must be null or a live descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn basic_print_channel_string(
    chan: i32,
    s: *mut StringDescriptor,
    line: i32,
) {
    channel_write(chan, line, &unsafe { crate::string::to_string(s) });
}

/// PRINT #chan item: integer.
#[unsafe(no_mangle)]
pub extern "C" fn basic_print_channel_int(chan: i32, v: i64, line: i32) {
    let text = if v >= 0 { format!(" {}", v) } else { v.to_string() };
    channel_write(chan, line, &text);
}

/// PRINT #chan item: double.
#[unsafe(no_mangle)]
pub extern "C" fn basic_print_channel_double(chan: i32, v: f64, line: i32) {
    let text = format_double(v);
    let text = if text.starts_with('-') { text } else { format!(" {}", text) };
    channel_write(chan, line, &text);
}

/// End-of-PRINT# newline.
#[unsafe(no_mangle)]
pub extern "C" fn basic_print_channel_newline(chan: i32, line: i32) {
    channel_write(chan, line, "\n");
}

/// INPUT #chan: one line, without the newline. Reads empty at EOF (pair
/// with `basic_eof`).
#[unsafe(no_mangle)]
pub extern "C" fn basic_input_line_channel(chan: i32, line: i32) -> *mut StringDescriptor {
    with_channel(chan, line, |channel| match channel {
        Channel::In(reader) => {
            let mut text = String::new();
            if reader.read_line(&mut text).is_err() {
                unsafe { crate::except::basic_throw(error_code::FILE_IO, line) };
            }
            while text.ends_with('\n') || text.ends_with('\r') {
                text.pop();
            }
            crate::string::from_str(&text)
        }
        Channel::Out(_) => unsafe { crate::except::basic_throw(error_code::FILE_IO, line) },
    })
}

/// EOF(chan): 1 when an input channel has no more bytes.
#[unsafe(no_mangle)]
pub extern "C" fn basic_eof(chan: i32, line: i32) -> i32 {
    with_channel(chan, line, |channel| match channel {
        Channel::In(reader) => match reader.fill_buf() {
            Ok(buf) => buf.is_empty() as i32,
            Err(_) => 1,
        },
        Channel::Out(_) => unsafe { crate::except::basic_throw(error_code::FILE_IO, line) },
    })
}

/// Teardown: release every open channel and flush stdout.
pub fn close_all() {
    CHANNELS.with(|channels| {
        for slot in channels.borrow_mut().iter_mut() {
            *slot = None;
        }
    });
    let _ = std::io::stdout().lock().flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samm;
    use std::io::Write as _;

    fn with_frame<F: FnOnce()>(f: F) {
        samm::samm_init();
        samm::samm_push();
        f();
        samm::samm_pop();
        samm::samm_shutdown();
    }

    #[test]
    fn double_formatting() {
        assert_eq!(format_double(2.0), "2");
        assert_eq!(format_double(2.5), "2.5");
        assert_eq!(format_double(-3.0), "-3");
        assert_eq!(format_double(0.125), "0.125");
        assert_eq!(format_double(1e20), "100000000000000000000");
    }

    #[test]
    fn channel_round_trip() {
        with_frame(|| unsafe {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("out.txt");
            let path_desc = crate::string::from_str(path.to_str().unwrap());

            basic_open(path_desc, 1, 1, 10);
            basic_print_channel_string(1, crate::string::from_str("alpha"), 11);
            basic_print_channel_newline(1, 11);
            basic_print_channel_int(1, 42, 12);
            basic_print_channel_newline(1, 12);
            basic_close(1, 13);

            basic_open(path_desc, 0, 2, 20);
            assert_eq!(basic_eof(2, 21), 0);
            let first = basic_input_line_channel(2, 21);
            assert_eq!(crate::string::to_string(first), "alpha");
            let second = basic_input_line_channel(2, 22);
            assert_eq!(crate::string::to_string(second), " 42");
            assert_eq!(basic_eof(2, 23), 1);
            basic_close(2, 24);
        });
    }

    #[test]
    fn append_mode_appends() {
        with_frame(|| unsafe {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("log.txt");
            std::fs::File::create(&path)
                .unwrap()
                .write_all(b"first\n")
                .unwrap();
            let path_desc = crate::string::from_str(path.to_str().unwrap());
            basic_open(path_desc, 2, 3, 1);
            basic_print_channel_string(3, crate::string::from_str("second"), 2);
            basic_print_channel_newline(3, 2);
            basic_close(3, 3);
            assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
        });
    }
}
