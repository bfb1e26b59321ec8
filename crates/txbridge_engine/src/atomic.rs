//! Atomic mutation semantics.
//!
//! Integer mutations treat values as little-endian unsigned integers of the
//! operand's width: a shorter existing value is zero-extended, a longer one
//! is truncated. A missing value behaves as zero, except for the min/max and
//! and mutations which take the operand as is.

use crate::types::MutationType;

/// Applies `mutation` to the existing value of a key.
///
/// Returns the new value, or `None` when the key ends up cleared.
pub fn apply_mutation(
    existing: Option<&[u8]>,
    operand: &[u8],
    mutation: MutationType,
    max_value_size: usize,
) -> Option<Vec<u8>> {
    match mutation {
        MutationType::Add => Some(add(&resize(existing, operand.len()), operand)),
        MutationType::BitAnd => match existing {
            None => Some(operand.to_vec()),
            Some(value) => Some(zip_bytes(&resize(Some(value), operand.len()), operand, |a, b| a & b)),
        },
        MutationType::BitOr => Some(zip_bytes(&resize(existing, operand.len()), operand, |a, b| a | b)),
        MutationType::BitXor => Some(zip_bytes(&resize(existing, operand.len()), operand, |a, b| a ^ b)),
        MutationType::AppendIfFits => {
            let current = existing.unwrap_or_default();
            if current.len() + operand.len() > max_value_size {
                Some(current.to_vec())
            } else {
                let mut value = current.to_vec();
                value.extend_from_slice(operand);
                Some(value)
            }
        }
        MutationType::Max => match existing {
            None => Some(operand.to_vec()),
            Some(value) => {
                let current = resize(Some(value), operand.len());
                if compare_le(&current, operand).is_ge() {
                    Some(current)
                } else {
                    Some(operand.to_vec())
                }
            }
        },
        MutationType::Min => match existing {
            None => Some(operand.to_vec()),
            Some(value) => {
                let current = resize(Some(value), operand.len());
                if compare_le(&current, operand).is_le() {
                    Some(current)
                } else {
                    Some(operand.to_vec())
                }
            }
        },
        MutationType::ByteMin => match existing {
            Some(value) if value <= operand => Some(value.to_vec()),
            _ => Some(operand.to_vec()),
        },
        MutationType::ByteMax => match existing {
            Some(value) if value >= operand => Some(value.to_vec()),
            _ => Some(operand.to_vec()),
        },
        MutationType::CompareAndClear => match existing {
            Some(value) if value == operand => None,
            other => other.map(<[u8]>::to_vec),
        },
    }
}

fn resize(value: Option<&[u8]>, width: usize) -> Vec<u8> {
    let mut bytes = value.unwrap_or_default().to_vec();
    bytes.resize(width, 0);
    bytes
}

fn add(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut carry = 0u16;
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let sum = u16::from(*x) + u16::from(*y) + carry;
            carry = sum >> 8;
            sum as u8
        })
        .collect()
}

fn zip_bytes(a: &[u8], b: &[u8], op: impl Fn(u8, u8) -> u8) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| op(*x, *y)).collect()
}

/// Compares two equal-width little-endian unsigned integers.
fn compare_le(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    a.iter().rev().cmp(b.iter().rev())
}
