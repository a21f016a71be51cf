//! Smallest-three rotation packing.
//!
//! A unit quaternion has one redundant component: the largest-magnitude one
//! can be rebuilt from the other three. The packed form keeps the three
//! smaller components, each quantized to `bits` bits over the range
//! `[-1/sqrt(2), 1/sqrt(2)]`, plus two bits naming the dropped component.
//!
//! ```text
//! [index(2)] [a(bits)] [b(bits)] [c(bits)]   total = 3 * bits + 2
//! ```

use std::f32::consts::FRAC_1_SQRT_2;

use crate::core::types::Quaternion;
use crate::error::{ProtocolError, Result};

/// Largest supported width per component (3 * 20 + 2 = 62 bits)
pub const MAX_BITS_PER_COMPONENT: u32 = 20;

/// Total packed width for a given component width
pub const fn packed_bits(bits_per_component: u32) -> u32 {
    bits_per_component * 3 + 2
}

/// Number of whole bytes the packed value occupies before varint encoding
pub const fn packed_bytes(bits_per_component: u32) -> usize {
    (packed_bits(bits_per_component) as usize).div_ceil(8)
}

fn check_bits(bits: u32) -> Result<()> {
    if bits == 0 || bits > MAX_BITS_PER_COMPONENT {
        return Err(ProtocolError::FormatError(format!(
            "bits per component must be within 1..={MAX_BITS_PER_COMPONENT}, got {bits}"
        )));
    }
    Ok(())
}

/// Pack a rotation into `3 * bits + 2` bits.
pub fn pack(rotation: Quaternion, bits: u32) -> Result<u64> {
    check_bits(bits)?;

    let mut components = rotation.normalized().to_array();
    let mut index = 0;
    for i in 1..4 {
        if components[i].abs() > components[index].abs() {
            index = i;
        }
    }

    // q and -q are the same rotation; keep the dropped component positive
    if components[index] < 0.0 {
        for c in components.iter_mut() {
            *c = -*c;
        }
    }

    let scale = ((1u64 << bits) - 1) as f32;
    let mut packed = index as u64;
    for (i, &c) in components.iter().enumerate() {
        if i == index {
            continue;
        }
        let unit = ((c / FRAC_1_SQRT_2).clamp(-1.0, 1.0) + 1.0) * 0.5;
        let quantized = (unit * scale).round() as u64;
        packed = (packed << bits) | quantized;
    }
    Ok(packed)
}

/// Rebuild a rotation from its packed form.
pub fn unpack(packed: u64, bits: u32) -> Result<Quaternion> {
    check_bits(bits)?;

    let mask = (1u64 << bits) - 1;
    let scale = mask as f32;
    let index = ((packed >> (bits * 3)) & 0b11) as usize;

    let mut smaller = [0.0f32; 3];
    for (slot, value) in smaller.iter_mut().enumerate() {
        let shift = bits * (2 - slot as u32);
        let quantized = (packed >> shift) & mask;
        *value = ((quantized as f32 / scale) * 2.0 - 1.0) * FRAC_1_SQRT_2;
    }

    let sum_sq: f32 = smaller.iter().map(|v| v * v).sum();
    let largest = (1.0 - sum_sq).max(0.0).sqrt();

    let mut components = [0.0f32; 4];
    let mut next = smaller.iter();
    for (i, c) in components.iter_mut().enumerate() {
        *c = if i == index {
            largest
        } else {
            next.next().copied().unwrap_or(0.0)
        };
    }

    Ok(Quaternion::from_array(components).normalized())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_size() {
        assert_eq!(packed_bits(10), 32);
        assert_eq!(packed_bytes(10), 4);
        assert_eq!(packed_bytes(9), 4);
        assert_eq!(packed_bytes(11), 5);
    }

    #[test]
    fn test_identity_roundtrip() {
        let packed = pack(Quaternion::IDENTITY, 10).unwrap();
        let q = unpack(packed, 10).unwrap();
        assert!(q.angle_to(Quaternion::IDENTITY) < 1e-3);
    }

    #[test]
    fn test_negative_largest_component() {
        let original = Quaternion::new(0.1, -0.9, 0.2, 0.3).normalized();
        let q = unpack(pack(original, 12).unwrap(), 12).unwrap();
        assert!(original.angle_to(q) < 0.01);
    }

    #[test]
    fn test_rejects_invalid_width() {
        assert!(pack(Quaternion::IDENTITY, 0).is_err());
        assert!(pack(Quaternion::IDENTITY, 21).is_err());
        assert!(unpack(0, 0).is_err());
    }
}
