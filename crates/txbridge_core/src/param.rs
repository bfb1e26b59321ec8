//! Byte-string arguments.
//!
//! Keys, values and operands accept either raw bytes or text. Text is passed
//! to the engine as its UTF-8 encoding; there is no other conversion.

use std::borrow::Cow;

/// A key, value or operand argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ByteParam<'a> {
    /// Raw bytes, passed through unchanged.
    Bytes(Cow<'a, [u8]>),
    /// Text, passed as its UTF-8 bytes.
    Text(Cow<'a, str>),
}

impl ByteParam<'_> {
    /// Returns the bytes sent to the engine.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ByteParam::Bytes(bytes) => bytes,
            ByteParam::Text(text) => text.as_bytes(),
        }
    }

    /// Consumes the parameter and returns owned bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            ByteParam::Bytes(bytes) => bytes.into_owned(),
            ByteParam::Text(text) => text.into_owned().into_bytes(),
        }
    }

    /// Number of bytes sent to the engine.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true for a zero-length parameter.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> From<&'a [u8]> for ByteParam<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        ByteParam::Bytes(Cow::Borrowed(bytes))
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for ByteParam<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        ByteParam::Bytes(Cow::Borrowed(bytes.as_slice()))
    }
}

impl<'a> From<&'a Vec<u8>> for ByteParam<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        ByteParam::Bytes(Cow::Borrowed(bytes.as_slice()))
    }
}

impl From<Vec<u8>> for ByteParam<'static> {
    fn from(bytes: Vec<u8>) -> Self {
        ByteParam::Bytes(Cow::Owned(bytes))
    }
}

impl<'a> From<&'a str> for ByteParam<'a> {
    fn from(text: &'a str) -> Self {
        ByteParam::Text(Cow::Borrowed(text))
    }
}

impl<'a> From<&'a String> for ByteParam<'a> {
    fn from(text: &'a String) -> Self {
        ByteParam::Text(Cow::Borrowed(text.as_str()))
    }
}

impl From<String> for ByteParam<'static> {
    fn from(text: String) -> Self {
        ByteParam::Text(Cow::Owned(text))
    }
}

impl AsRef<[u8]> for ByteParam<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
