//! 256-bit group sets.
//!
//! A [`Mask`] holds one bit per group: bit `i` of the numeric value (counted
//! from the least significant bit) is group `i`. The canonical wire form is
//! the 32-byte big-endian encoding of that value, which is also how the
//! permission manager emits masks in its events.

use alloy_primitives::{hex, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;
use thiserror::Error;

pub type GroupId = u8;

/// Root of the admin hierarchy; implicitly an admin of every group.
pub const ADMIN: GroupId = 0;
/// Held by every account whether or not it was ever added.
pub const PUBLIC: GroupId = 255;

pub const MASK_BYTES: usize = 32;
pub const MASK_BITS: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaskError {
    #[error("group id {0} is outside [0, 255]")]
    OutOfRange(usize),
    #[error("mask must be exactly {MASK_BYTES} bytes, got {0}")]
    Width(usize),
    #[error("invalid mask literal {0:?}")]
    Literal(String),
}

/// Converts a positional index (e.g. a role's declaration order) into a group id.
pub fn group_id(index: usize) -> Result<GroupId, MaskError> {
    GroupId::try_from(index).map_err(|_| MaskError::OutOfRange(index))
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Mask(U256);

impl Mask {
    pub const EMPTY: Mask = Mask(U256::ZERO);

    /// `1 << group`
    pub fn of(group: GroupId) -> Self {
        Mask(U256::from(1u8) << usize::from(group))
    }

    /// OR of all given masks; the empty mask when there are none.
    pub fn combine<I: IntoIterator<Item = Mask>>(masks: I) -> Self {
        masks.into_iter().fold(Self::EMPTY, |acc, m| acc | m)
    }

    pub fn from_groups<I: IntoIterator<Item = GroupId>>(groups: I) -> Self {
        Self::combine(groups.into_iter().map(Self::of))
    }

    pub fn contains(&self, group: GroupId) -> bool {
        self.0.bit(usize::from(group))
    }

    pub fn intersects(&self, other: Mask) -> bool {
        !(self.0 & other.0).is_zero()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_zero()
    }

    pub fn with(self, group: GroupId) -> Self {
        self | Self::of(group)
    }

    pub fn without(self, group: GroupId) -> Self {
        Mask(self.0 & !Self::of(group).0)
    }

    /// Ascending group ids set in this mask. The iterator owns a copy of the
    /// mask, so calling `groups()` again always restarts from group 0.
    pub fn groups(&self) -> Groups {
        Groups {
            mask: self.0,
            next: 0,
        }
    }

    pub fn to_vec(&self) -> Vec<GroupId> {
        self.groups().collect()
    }

    pub fn to_be_bytes(&self) -> [u8; MASK_BYTES] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; MASK_BYTES]) -> Self {
        Mask(U256::from_be_bytes(bytes))
    }

    /// Strict decode: anything other than exactly 32 bytes is rejected
    /// instead of being padded or truncated.
    pub fn from_be_slice(bytes: &[u8]) -> Result<Self, MaskError> {
        let bytes: [u8; MASK_BYTES] = bytes
            .try_into()
            .map_err(|_| MaskError::Width(bytes.len()))?;
        Ok(Self::from_be_bytes(bytes))
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }
}

impl From<U256> for Mask {
    fn from(value: U256) -> Self {
        Mask(value)
    }
}

impl From<Mask> for U256 {
    fn from(mask: Mask) -> Self {
        mask.0
    }
}

impl FromIterator<GroupId> for Mask {
    fn from_iter<I: IntoIterator<Item = GroupId>>(iter: I) -> Self {
        Self::from_groups(iter)
    }
}

impl BitOr for Mask {
    type Output = Mask;

    fn bitor(self, rhs: Mask) -> Mask {
        Mask(self.0 | rhs.0)
    }
}

impl BitOrAssign for Mask {
    fn bitor_assign(&mut self, rhs: Mask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Mask {
    type Output = Mask;

    fn bitand(self, rhs: Mask) -> Mask {
        Mask(self.0 & rhs.0)
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_prefixed(self.to_be_bytes()))
    }
}

impl FromStr for Mask {
    type Err = MaskError;

    /// Accepts `0x`-prefixed hex or a decimal literal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_str(s)
            .map(Mask)
            .map_err(|_| MaskError::Literal(s.to_string()))
    }
}

/// Iterator over the groups of a [`Mask`], see [`Mask::groups`].
#[derive(Clone, Debug)]
pub struct Groups {
    mask: U256,
    next: usize,
}

impl Iterator for Groups {
    type Item = GroupId;

    fn next(&mut self) -> Option<GroupId> {
        while self.next < MASK_BITS {
            let bit = self.next;
            self.next += 1;
            if self.mask.bit(bit) {
                // bit < 256 by the loop bound
                return GroupId::try_from(bit).ok();
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs_decode_sorted() {
        for (i, j) in [(0u8, 1u8), (7, 3), (255, 0), (128, 127), (200, 64)] {
            let decoded = Mask::combine([Mask::of(i), Mask::of(j)]).to_vec();
            assert_eq!(decoded, vec![i.min(j), i.max(j)]);
        }
    }

    #[test]
    fn test_decode_arbitrary_set() {
        let set = [254u8, 3, 0, 77, 255, 12];
        let mut sorted = set.to_vec();
        sorted.sort();
        assert_eq!(Mask::from_groups(set).to_vec(), sorted);
    }

    #[test]
    fn test_combine_identity_and_order() {
        assert_eq!(Mask::combine([]), Mask::EMPTY);
        let a = Mask::of(4);
        let b = Mask::of(9);
        assert_eq!(a | b, b | a);
        assert_eq!(Mask::combine([a, Mask::EMPTY]), a);
    }

    #[test]
    fn test_intersects() {
        let ab = Mask::from_groups([1, 2]);
        assert!(ab.intersects(Mask::of(2)));
        assert!(!ab.intersects(Mask::of(3)));
        assert!(!Mask::EMPTY.intersects(Mask::EMPTY));
    }

    #[test]
    fn test_public_is_top_bit() {
        let bytes = Mask::of(PUBLIC).to_be_bytes();
        assert_eq!(bytes[0], 0x80);
        assert!(bytes[1..].iter().all(|b| *b == 0));
        assert_eq!(Mask::from_be_bytes(bytes).to_vec(), vec![PUBLIC]);
    }

    #[test]
    fn test_admin_is_lowest_bit() {
        let bytes = Mask::of(ADMIN).to_be_bytes();
        assert_eq!(bytes[31], 1);
        assert_eq!(Mask::of(ADMIN).to_string(), format!("0x{}1", "0".repeat(63)));
    }

    #[test]
    fn test_groups_restartable() {
        let mask = Mask::from_groups([5, 6]);
        let first: Vec<_> = mask.groups().collect();
        let second: Vec<_> = mask.groups().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_strict_width() {
        assert_eq!(Mask::from_be_slice(&[0u8; 31]), Err(MaskError::Width(31)));
        assert_eq!(Mask::from_be_slice(&[0u8; 33]), Err(MaskError::Width(33)));
        assert_eq!(Mask::from_be_slice(&[0u8; 32]), Ok(Mask::EMPTY));
    }

    #[test]
    fn test_group_id_range() {
        assert_eq!(group_id(255), Ok(255));
        assert_eq!(group_id(256), Err(MaskError::OutOfRange(256)));
    }

    #[test]
    fn test_with_without() {
        let m = Mask::EMPTY.with(3).with(9).without(3);
        assert_eq!(m.to_vec(), vec![9]);
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!("0x5".parse::<Mask>(), Ok(Mask::from_groups([0, 2])));
        assert_eq!("6".parse::<Mask>(), Ok(Mask::from_groups([1, 2])));
        assert!("zz".parse::<Mask>().is_err());
    }
}
