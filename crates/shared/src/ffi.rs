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

//! Abstractions for values that cross the boundary between Rust and the outside world: numbers
//! that come out of registers and strings that come out of user memory.

use {
    core::{
        fmt,
        marker::PhantomData,
        slice
    },
    error::Error
};

/// Wraps enum definitions with specific `#[repr]`s, adding a checked conversion from the raw
/// integer and an unchecked one back to it.
#[macro_export]
macro_rules! ffi_enum {
    ($(
        #[repr( $base_type:tt )]
        $(#[$post_attr:meta])*
        $vis:vis enum $enum:ident {
            $(
                $(#[$variant_attr:meta])*
                $variant:ident $(= $val:expr)?
            ),* $(,)?
        }
      )*) => {
        $(
            #[repr($base_type)]
            $(#[$post_attr])*
            $vis enum $enum {
                $(
                    $(#[$variant_attr])*
                    $variant $(= $val)?
                ),*
            }
            impl core::convert::TryFrom<$base_type> for $enum {
                type Error = $crate::ffi::InvalidVariantError<$base_type>;

                fn try_from(value: $base_type) -> Result<$enum, Self::Error> {
                    match value {
                        $(x if x == $enum::$variant as $base_type => Ok($enum::$variant),)*
                        value => Err($crate::ffi::InvalidVariantError::new(stringify!($enum), value))
                    }
                }
            }
            impl From<$enum> for $base_type {
                fn from(value: $enum) -> $base_type {
                    value as $base_type
                }
            }
        )*
    };
}

/// The error returned when an integer doesn't name any variant of an enum defined by `ffi_enum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidVariantError<T: Into<i128>+Copy+fmt::Debug> {
    enum_type: &'static str,
    value: T
}

impl<T: Into<i128>+Copy+fmt::Debug> InvalidVariantError<T> {
    /// Makes a new instance of the error for the given enum type and integer value.
    pub fn new(enum_type: &'static str, value: T) -> InvalidVariantError<T> {
        InvalidVariantError { enum_type, value }
    }

    /// The number that couldn't be converted.
    pub fn value(&self) -> T {
        self.value
    }
}

impl<T: Into<i128>+Copy+fmt::Debug> Error for InvalidVariantError<T> {}

impl<T: Into<i128>+Copy+fmt::Debug> fmt::Display for InvalidVariantError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} is not a valid `{}`", self.value.into(), self.enum_type)
    }
}

/// A reference to a C string: a run of bytes that ends at the first null byte.
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct CStrRef<'a>(&'a u8);

/// Converts a literal `&'static str` into a `CStrRef`, adding the null terminator.
#[macro_export]
macro_rules! c_str {
    ($str:expr) => {
        match $crate::ffi::CStrRef::from_null_terminated_slice(concat!($str, "\0").as_bytes()) {
            Some(s) => s,
            None => panic!("string literal contains a null byte")
        }
    }
}

impl<'a> CStrRef<'a> {
    /// Converts the given raw pointer to a C string reference.
    ///
    /// # Safety
    /// The pointer must be non-null, and the memory it points to must be initialized and unchanging
    /// for `'a`, up to and including the first zero byte (or up to whatever limit the caller will
    /// later pass to the `_capped` methods).
    pub unsafe fn from_ptr(ptr: *const u8) -> CStrRef<'a> {
        CStrRef(&*ptr)
    }

    /// Converts a null-terminated byte slice into a C string reference.
    ///
    /// # Returns
    /// `None` unless the slice's only null byte is its last one.
    pub fn from_null_terminated_slice(slice: &'a [u8]) -> Option<CStrRef<'a>> {
        match slice.iter().position(|&b| b == 0) {
            Some(i) if i == slice.len() - 1 => Some(CStrRef(&slice[0])),
            _ => None
        }
    }

    /// Returns an iterator over the bytes in this C string, excluding the null terminator.
    pub fn iter(&self) -> CStrBytes<'a> {
        CStrBytes { cursor: self.0, remaining: usize::MAX, _phantom: PhantomData }
    }

    /// Returns the number of bytes before the null terminator.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Determines whether the string is empty.
    pub fn is_empty(&self) -> bool {
        *self.0 == 0
    }

    /// Returns the number of bytes before the null terminator or `max_len`, whichever is smaller.
    /// Use this when the string came from somewhere that might have left off the terminator.
    pub fn len_capped(&self, max_len: usize) -> usize {
        let mut bytes = self.iter();
        bytes.remaining = max_len;
        bytes.count()
    }

    /// Views the first `max_len` bytes of the string (or all of it, if it's shorter).
    pub fn as_bytes_capped(&self, max_len: usize) -> &'a [u8] {
        unsafe { slice::from_raw_parts(self.0, self.len_capped(max_len)) }
    }

    /// Views the whole string, not including the null terminator.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.as_bytes_capped(usize::MAX)
    }
}

impl fmt::Debug for CStrRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl fmt::Display for CStrRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.iter().try_for_each(|&c| write!(f, "{}", char::from(c)))
    }
}

impl PartialEq for CStrRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

/// An iterator over the bytes in a C string, not including the null terminator.
#[derive(Debug)]
pub struct CStrBytes<'a> {
    cursor: *const u8,
    remaining: usize,
    _phantom: PhantomData<&'a u8>
}

impl<'a> Iterator for CStrBytes<'a> {
    type Item = &'a u8;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let byte = unsafe { &*self.cursor };
        if *byte == 0 {
            None
        } else {
            self.remaining -= 1;
            self.cursor = unsafe { self.cursor.add(1) };
            Some(byte)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod enums {
        ffi_enum! {
            #[repr(u8)]
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            enum Colour {
                Red = 1,
                Green = 2,
                Blue = 7
            }
        }

        #[test]
        fn known_values() {
            assert_eq!(Colour::try_from(1u8).ok(), Some(Colour::Red));
            assert_eq!(Colour::try_from(7u8).ok(), Some(Colour::Blue));
            assert_eq!(u8::from(Colour::Green), 2);
        }

        #[test]
        fn unknown_values() {
            for value in [0u8, 3, 6, 8, 255] {
                let err = Colour::try_from(value).unwrap_err();
                assert_eq!(err.value(), value);
                assert_eq!(format!("{}", err), format!("{} is not a valid `Colour`", value));
            }
        }
    }

    mod c_strings {
        use super::*;

        #[test]
        fn good_strings() {
            for &string in ["\0", "foo\0", "This is a sentence.\0", "\x01\x02\x03\0"].iter() {
                let c_string = CStrRef::from_null_terminated_slice(string.as_bytes()).unwrap();
                assert_eq!(c_string.len(), string.len() - 1);
                assert_eq!(c_string.is_empty(), string.len() == 1);
                assert_eq!(c_string.as_bytes(), &string.as_bytes()[.. string.len() - 1]);
                assert_eq!(c_string, unsafe { CStrRef::from_ptr(string.as_ptr()) });
            }
        }

        #[test]
        fn bad_strings() {
            for &string in ["", "foo", "\0foo\0", "str\0ing\0", "This is\0a sentence."].iter() {
                assert!(CStrRef::from_null_terminated_slice(string.as_bytes()).is_none());
            }
        }

        #[test]
        fn capped() {
            let s = c_str!("hello, world");
            assert_eq!(s.len_capped(5), 5);
            assert_eq!(s.as_bytes_capped(5), b"hello");
            assert_eq!(s.as_bytes_capped(100), b"hello, world");
            assert_eq!(format!("{}", s), "hello, world");
            assert_eq!(format!("{:?}", s), "\"hello, world\"");
        }

        #[test]
        fn unterminated_buffer_stops_at_cap() {
            let bytes = [b'a'; 8];
            let s = unsafe { CStrRef::from_ptr(bytes.as_ptr()) };
            assert_eq!(s.as_bytes_capped(8), &bytes[..]);
        }
    }
}
