/* Copyright (c) 2017-2021 Jeremy Davis (jeremydavis519@gmail.com)
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy of this software
 * and associated documentation files (the "Software"), to deal in the Software without restriction,
 * including without limitation the rights to use, copy, modify, merge, publish, distribute,
 * sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all copies or
 * substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT
 * NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
 * NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM,
 * DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.
 */

//! This crate is how the kernel talks to whoever is watching: the `print!` family of macros and the
//! console they write to.

#![cfg_attr(not(test), no_std)]

#![deny(warnings, missing_docs)]

extern crate alloc;

pub mod serial;

use {
    alloc::boxed::Box,
    core::fmt::{self, Write},
    spin::Mutex
};

/// Prints the given string with format arguments, followed by a newline.
#[macro_export]
macro_rules! println {
    () => { $crate::print!("\n") };
    ($fmt:expr $(, $arg:expr)* $(,)?) => { $crate::print!(concat!($fmt, "\n") $(, $arg)*) };
}

/// Prints the given string with format arguments (not followed by a newline).
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => { $crate::_print(format_args!($($arg)*)) };
}

/// Prints the given string with format arguments, followed by a newline, if the code was built in
/// debug mode. Note: Any side-effects associated with the arguments will take place even in
/// release mode.
#[macro_export]
macro_rules! printlndebug {
    () => { $crate::printdebug!("\n") };
    ($fmt:expr $(, $arg:expr)* $(,)?) => { $crate::printdebug!(concat!($fmt, "\n") $(, $arg)*) };
}

/// Prints the given string with format arguments (not followed by a newline) if the code was built
/// in debug mode. Note: Any side-effects associated with the arguments will take place even in
/// release mode.
#[macro_export]
macro_rules! printdebug {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {{
        #[cfg(debug_assertions)] $crate::print!($fmt $(, $arg)*);
        #[cfg(not(debug_assertions))] {
            $(let _ = &$arg;)*
        }
    }};
}

/// Anything that can display the kernel's text output.
pub type Console = Box<dyn Write + Send>;

static CONSOLE: Mutex<Option<Console>> = Mutex::new(None);

/// Sends all further output to `console` instead of the board's default serial port.
///
/// # Returns
/// The console that was installed before, if any.
pub fn set_console(console: Console) -> Option<Console> {
    CONSOLE.lock().replace(console)
}

/// Removes the installed console, sending all further output back to the board's default.
pub fn take_console() -> Option<Console> {
    CONSOLE.lock().take()
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // A trap can arrive while the lock is held. It still gets to say something.
    match CONSOLE.try_lock() {
        Some(mut console) => match console.as_mut() {
            Some(console) => { let _ = console.write_fmt(args); },
            None          => default_print(args)
        },
        None => default_print(args)
    }
}

#[cfg(target_arch = "arm")]
fn default_print(args: fmt::Arguments) {
    let _ = serial::Pl011::uart0().write_fmt(args);
}

#[cfg(not(target_arch = "arm"))]
fn default_print(_args: fmt::Arguments) {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::{string::String, sync::Arc};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<String>>);

    impl Write for Capture {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0.lock().push_str(s);
            Ok(())
        }
    }

    // Every test here shares the one console.
    static CONSOLE_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn output_reaches_installed_console() {
        let _guard = CONSOLE_LOCK.lock();
        let capture = Capture::default();
        set_console(Box::new(capture.clone()));
        crate::print!("{}-{}", 1, 2);
        crate::println!(" done");
        crate::println!();
        take_console();
        assert_eq!(*capture.0.lock(), "1-2 done\n\n");
    }

    #[test]
    fn nothing_after_take() {
        let _guard = CONSOLE_LOCK.lock();
        let capture = Capture::default();
        set_console(Box::new(capture.clone()));
        assert!(take_console().is_some());
        crate::println!("lost");
        assert!(capture.0.lock().is_empty());
    }

    #[test]
    fn debug_output() {
        let _guard = CONSOLE_LOCK.lock();
        let capture = Capture::default();
        set_console(Box::new(capture.clone()));
        crate::printlndebug!("syscall {}", 14);
        take_console();
        if cfg!(debug_assertions) {
            assert_eq!(*capture.0.lock(), "syscall 14\n");
        } else {
            assert!(capture.0.lock().is_empty());
        }
    }
}
