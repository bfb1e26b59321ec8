//! Result decoders, one per native result shape.
//!
//! Decoders run on the caller's thread after the operation resolved.

use super::shared::NativeFuture;
use crate::error::CoreResult;
use crate::selector::RangeResult;

/// Reads the typed result of a resolved native future.
pub(crate) type Decoder<T> = fn(&NativeFuture) -> CoreResult<T>;

/// No payload; success or the engine error.
pub(crate) fn void(future: &NativeFuture) -> CoreResult<()> {
    Ok(future.engine().future_get_error(future.id())?)
}

/// Optional value; `None` means the key is absent.
pub(crate) fn value(future: &NativeFuture) -> CoreResult<Option<Vec<u8>>> {
    Ok(future.engine().future_get_value(future.id())?)
}

/// A key.
pub(crate) fn key(future: &NativeFuture) -> CoreResult<Vec<u8>> {
    Ok(future.engine().future_get_key(future.id())?)
}

/// A batch of pairs and the `more` flag.
pub(crate) fn key_values(future: &NativeFuture) -> CoreResult<RangeResult> {
    let (key_values, more) = future.engine().future_get_key_values(future.id())?;
    Ok(RangeResult { key_values, more })
}

/// A list of strings.
pub(crate) fn strings(future: &NativeFuture) -> CoreResult<Vec<String>> {
    Ok(future.engine().future_get_string_array(future.id())?)
}

/// A 64-bit version.
pub(crate) fn version(future: &NativeFuture) -> CoreResult<i64> {
    Ok(future.engine().future_get_version(future.id())?)
}
