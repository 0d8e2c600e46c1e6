//! Conversion between banked `bank/offset` addresses and flat image offsets.
//!
//! Banks below `0xC0` use the mirrored lower layout, where only the low six
//! bits of the bank select a 32 KiB slice. Banks `0xC0..=0xFF` map the upper
//! half of the image starting at `0x200000`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{QuestError, Result};

pub const BANK_SIZE: usize = 0x8000;
pub const BANK_WINDOW: u16 = 0x8000;
pub const UPPER_BASE: usize = 0x20_0000;
pub const UPPER_FIRST_BANK: u8 = 0xC0;
pub const MAX_IMAGE_SIZE: usize = 0x40_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BankAddress {
    pub bank: u8,
    pub offset: u16,
}

impl BankAddress {
    pub fn new(bank: u8, offset: u16) -> Result<Self> {
        if offset < BANK_WINDOW {
            return Err(QuestError::AddressOutOfRange(format!(
                "offset {offset:#06X} in bank {bank:#04X} is below the 0x8000 window"
            )));
        }
        Ok(Self { bank, offset })
    }

    /// Relocate a 16-bit pointer into `bank`.
    pub fn in_bank(bank: u8, pointer: u16) -> Result<Self> {
        Self::new(bank, pointer)
    }

    pub fn to_flat(self) -> usize {
        let in_bank = usize::from(self.offset - BANK_WINDOW);
        if self.bank >= UPPER_FIRST_BANK {
            UPPER_BASE + usize::from(self.bank - UPPER_FIRST_BANK) * BANK_SIZE + in_bank
        } else {
            usize::from(self.bank & 0x3F) * BANK_SIZE + in_bank
        }
    }

    /// Like [`to_flat`](Self::to_flat) but also checks the result against the image.
    pub fn to_flat_in(self, image_size: usize) -> Result<usize> {
        let flat = self.to_flat();
        if flat >= image_size {
            return Err(QuestError::AddressOutOfRange(format!(
                "{self} maps to {flat:#08X}, past the end of a {image_size:#X} byte image"
            )));
        }
        Ok(flat)
    }

    pub fn from_flat(flat: usize, image_size: usize) -> Result<Self> {
        if flat >= image_size || flat >= MAX_IMAGE_SIZE {
            return Err(QuestError::AddressOutOfRange(format!(
                "flat offset {flat:#08X} is outside a {image_size:#X} byte image"
            )));
        }

        let (bank, rest) = if flat >= UPPER_BASE {
            let rel = flat - UPPER_BASE;
            (UPPER_FIRST_BANK as usize + rel / BANK_SIZE, rel % BANK_SIZE)
        } else {
            (flat / BANK_SIZE, flat % BANK_SIZE)
        };

        Ok(Self {
            bank: bank as u8,
            offset: BANK_WINDOW + rest as u16,
        })
    }
}

impl fmt::Display for BankAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}/{:04X}", self.bank, self.offset)
    }
}

impl FromStr for BankAddress {
    type Err = QuestError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || QuestError::AddressOutOfRange(format!("'{s}' is not a 0xBB/OOOO address"));

        let body = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(bad)?;
        let (bank, offset) = body.split_once('/').ok_or_else(bad)?;
        if bank.len() != 2 || offset.len() != 4 {
            return Err(bad());
        }
        let bank = u8::from_str_radix(bank, 16).map_err(|_| bad())?;
        let offset = u16::from_str_radix(offset, 16).map_err(|_| bad())?;
        Self::new(bank, offset)
    }
}

pub fn to_flat(bank: u8, offset: u16) -> Result<usize> {
    Ok(BankAddress::new(bank, offset)?.to_flat())
}

pub fn from_flat(flat: usize, image_size: usize) -> Result<(u8, u16)> {
    let addr = BankAddress::from_flat(flat, image_size)?;
    Ok((addr.bank, addr.offset))
}

/// Canonical `0xBB/OOOO` notation for a flat offset.
pub fn format_flat(flat: usize) -> Result<String> {
    Ok(BankAddress::from_flat(flat, MAX_IMAGE_SIZE)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lower_half_uses_masked_bank() {
        assert_eq!(to_flat(0x03, 0x8036).unwrap(), 0x01_8036);
        assert_eq!(to_flat(0x83, 0x8036).unwrap(), 0x01_8036);
        assert_eq!(to_flat(0x00, 0x8000).unwrap(), 0);
    }

    #[test]
    fn upper_half_starts_at_2mib() {
        assert_eq!(to_flat(0xC0, 0x8000).unwrap(), 0x20_0000);
        assert_eq!(to_flat(0xC1, 0x9234).unwrap(), 0x20_9234);
    }

    #[test]
    fn offsets_below_window_are_rejected() {
        assert!(matches!(
            to_flat(0x03, 0x7FFF),
            Err(QuestError::AddressOutOfRange(_))
        ));
    }

    #[test]
    fn flat_outside_image_is_rejected() {
        assert!(from_flat(0x8000, 0x8000).is_err());
        assert!(from_flat(MAX_IMAGE_SIZE, usize::MAX).is_err());
    }

    #[test]
    fn formats_canonical_notation() {
        assert_eq!(format_flat(0x01_8036).unwrap(), "0x03/8036");
        assert_eq!(format_flat(0x20_0010).unwrap(), "0xC0/8010");
        let parsed: BankAddress = "0x03/8036".parse().unwrap();
        assert_eq!(parsed, BankAddress { bank: 3, offset: 0x8036 });
        assert!("0x3/8036".parse::<BankAddress>().is_err());
    }

    proptest! {
        #[test]
        fn canonical_pairs_round_trip(bank in prop_oneof![0u8..=0x3F, 0xC0u8..=0xFF], offset in 0x8000u16..=0xFFFF) {
            let flat = to_flat(bank, offset).unwrap();
            prop_assert_eq!(from_flat(flat, MAX_IMAGE_SIZE).unwrap(), (bank, offset));
        }

        #[test]
        fn flat_offsets_round_trip(flat in 0usize..MAX_IMAGE_SIZE) {
            let (bank, offset) = from_flat(flat, MAX_IMAGE_SIZE).unwrap();
            prop_assert_eq!(to_flat(bank, offset).unwrap(), flat);
        }
    }
}
