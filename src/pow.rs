//! Proof of work: compact targets, block work and difficulty retargeting

use crate::config::ConsensusParams;
use crate::constants::RETARGETING_FACTOR;
use crate::types::*;
use std::cmp::Ordering;

/// 256-bit unsigned integer for targets and cumulative chain work.
///
/// Words are stored least significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct U256([u64; 4]);

impl U256 {
    pub const ZERO: U256 = U256([0; 4]);
    pub const ONE: U256 = U256([1, 0, 0, 0]);
    pub const MAX: U256 = U256([u64::MAX; 4]);

    pub fn from_u64(value: u64) -> Self {
        U256([value, 0, 0, 0])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&word| word == 0)
    }

    /// Low 64 bits
    pub fn low_u64(&self) -> u64 {
        self.0[0]
    }

    /// Interpret 32 bytes as a little-endian number, as block hashes are.
    pub fn from_le_bytes(bytes: &[u8; 32]) -> Self {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            *word = u64::from_le_bytes(chunk);
        }
        U256(words)
    }

    pub fn to_le_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (i, word) in self.0.iter().enumerate() {
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Number of significant bits
    pub fn bits(&self) -> u32 {
        for i in (0..4).rev() {
            if self.0[i] != 0 {
                return 64 * i as u32 + 64 - self.0[i].leading_zeros();
            }
        }
        0
    }

    fn bit(&self, index: u32) -> bool {
        (self.0[(index / 64) as usize] >> (index % 64)) & 1 == 1
    }

    fn set_bit(&mut self, index: u32) {
        self.0[(index / 64) as usize] |= 1 << (index % 64);
    }

    pub fn shl(&self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::ZERO;
        }

        let mut result = U256::ZERO;
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;

        for i in 0..4 {
            if i + word_shift < 4 {
                result.0[i + word_shift] |= self.0[i] << bit_shift;
                if bit_shift > 0 && i + word_shift + 1 < 4 {
                    result.0[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
                }
            }
        }

        result
    }

    pub fn shr(&self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::ZERO;
        }

        let mut result = U256::ZERO;
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;

        for i in word_shift..4 {
            result.0[i - word_shift] |= self.0[i] >> bit_shift;
            if bit_shift > 0 && i > word_shift {
                result.0[i - word_shift - 1] |= self.0[i] << (64 - bit_shift);
            }
        }

        result
    }

    pub fn not(&self) -> Self {
        U256([!self.0[0], !self.0[1], !self.0[2], !self.0[3]])
    }

    pub fn overflowing_add(&self, other: &U256) -> (U256, bool) {
        let mut result = U256::ZERO;
        let mut carry = false;
        for i in 0..4 {
            let (sum, first) = self.0[i].overflowing_add(other.0[i]);
            let (sum, second) = sum.overflowing_add(carry as u64);
            result.0[i] = sum;
            carry = first || second;
        }
        (result, carry)
    }

    /// Addition that pins at `U256::MAX` instead of wrapping.
    pub fn saturating_add(&self, other: &U256) -> U256 {
        match self.overflowing_add(other) {
            (sum, false) => sum,
            (_, true) => U256::MAX,
        }
    }

    pub fn wrapping_sub(&self, other: &U256) -> U256 {
        let mut result = U256::ZERO;
        let mut borrow = false;
        for i in 0..4 {
            let (diff, first) = self.0[i].overflowing_sub(other.0[i]);
            let (diff, second) = diff.overflowing_sub(borrow as u64);
            result.0[i] = diff;
            borrow = first || second;
        }
        result
    }

    pub fn checked_mul_u64(&self, factor: u64) -> Option<U256> {
        let mut result = U256::ZERO;
        let mut carry = 0u128;
        for i in 0..4 {
            let product = self.0[i] as u128 * factor as u128 + carry;
            result.0[i] = product as u64;
            carry = product >> 64;
        }
        if carry == 0 {
            Some(result)
        } else {
            None
        }
    }

    pub fn checked_div_u64(&self, divisor: u64) -> Option<U256> {
        if divisor == 0 {
            return None;
        }

        let mut result = U256::ZERO;
        let mut remainder = 0u128;
        for i in (0..4).rev() {
            let current = (remainder << 64) | self.0[i] as u128;
            result.0[i] = (current / divisor as u128) as u64;
            remainder = current % divisor as u128;
        }
        Some(result)
    }

    /// Binary long division.
    pub fn checked_div(&self, divisor: &U256) -> Option<U256> {
        if divisor.is_zero() {
            return None;
        }

        let mut quotient = U256::ZERO;
        let mut remainder = U256::ZERO;
        for index in (0..self.bits()).rev() {
            let carried_out = remainder.bit(255);
            remainder = remainder.shl(1);
            if self.bit(index) {
                remainder.0[0] |= 1;
            }
            if carried_out || remainder >= *divisor {
                remainder = remainder.wrapping_sub(divisor);
                quotient.set_bit(index);
            }
        }
        Some(quotient)
    }

    /// Decode the compact ("nBits") form. `None` when negative or overflowing.
    pub fn from_compact(bits: u32) -> Option<U256> {
        let size = bits >> 24;
        let mut word = bits & 0x007f_ffff;

        let negative = word != 0 && (bits & 0x0080_0000) != 0;
        let overflow = word != 0
            && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));
        if negative || overflow {
            return None;
        }

        if size <= 3 {
            word >>= 8 * (3 - size);
            Some(U256::from_u64(word as u64))
        } else {
            Some(U256::from_u64(word as u64).shl(8 * (size - 3)))
        }
    }

    pub fn to_compact(&self) -> u32 {
        let mut size = (self.bits() + 7) / 8;
        let mut compact = if size <= 3 {
            (self.low_u64() << (8 * (3 - size))) as u32
        } else {
            self.shr(8 * (size - 3)).low_u64() as u32
        };

        // The sign bit must stay clear
        if compact & 0x0080_0000 != 0 {
            compact >>= 8;
            size += 1;
        }

        compact | (size << 24)
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().rev().zip(other.0.iter().rev()) {
            match a.cmp(b) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        Ordering::Equal
    }
}

/// Expected number of hashes to meet `bits`: `2^256 / (target + 1)`.
///
/// Computed as `(!target / (target + 1)) + 1`, which avoids needing 2^256.
/// Invalid or zero targets contribute no work.
pub fn block_work(bits: u32) -> U256 {
    let target = match U256::from_compact(bits) {
        Some(target) if !target.is_zero() => target,
        _ => return U256::ZERO,
    };

    let (divisor, overflow) = target.overflowing_add(&U256::ONE);
    if overflow {
        return U256::ONE;
    }

    target
        .not()
        .checked_div(&divisor)
        .map(|quotient| quotient.saturating_add(&U256::ONE))
        .unwrap_or(U256::ZERO)
}

/// Whether `bits` decodes to a positive target no easier than `pow_limit`.
pub fn check_target(bits: u32, pow_limit: u32) -> bool {
    match (U256::from_compact(bits), U256::from_compact(pow_limit)) {
        (Some(target), Some(limit)) => !target.is_zero() && target <= limit,
        _ => false,
    }
}

/// Seal (proof) validation; the core never assumes a particular scheme.
pub trait ProofValidator: Send + Sync {
    fn check_seal(&self, header: &BlockHeader, pow_limit: u32) -> bool;
}

/// Hash-below-target proof of work.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactTargetValidator;

impl ProofValidator for CompactTargetValidator {
    fn check_seal(&self, header: &BlockHeader, pow_limit: u32) -> bool {
        if !check_target(header.bits, pow_limit) {
            return false;
        }

        match U256::from_compact(header.bits) {
            Some(target) => U256::from_le_bytes(&header.hash()) <= target,
            None => false,
        }
    }
}

/// Height of the header that opens the retarget window ending at `height`,
/// or `None` when no retarget happens there.
pub fn retarget_window_start(params: &ConsensusParams, height: Natural) -> Option<Natural> {
    if !params.retargeting || height == 0 || height % params.retarget_interval != 0 {
        return None;
    }
    Some(height - params.retarget_interval)
}

/// Bits a block at `height` must carry.
///
/// `window_start` is the header at [`retarget_window_start`]; it is only
/// consulted on retarget heights. Returns `None` if it is needed but absent.
pub fn next_work_required(
    params: &ConsensusParams,
    height: Natural,
    parent: &BlockHeader,
    window_start: Option<&BlockHeader>,
) -> Option<u32> {
    if retarget_window_start(params, height).is_none() {
        return Some(parent.bits);
    }

    let first = window_start?;
    let timespan = params.target_timespan;
    let actual = (parent.timestamp as u64)
        .saturating_sub(first.timestamp as u64)
        .clamp(timespan / RETARGETING_FACTOR, timespan * RETARGETING_FACTOR);

    let limit = U256::from_compact(params.pow_limit)?;
    let retargeted = U256::from_compact(parent.bits)
        .and_then(|target| target.checked_mul_u64(actual))
        .and_then(|scaled| scaled.checked_div_u64(timespan));

    let target = match retargeted {
        Some(target) if target <= limit => target,
        _ => limit,
    };

    Some(target.to_compact())
}
