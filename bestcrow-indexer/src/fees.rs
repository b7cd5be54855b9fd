// SPDX-License-Identifier: Apache-2.0

//! Protocol fee and collateral arithmetic.
//!
//! Results must match the contract's truncating integer division bit for bit,
//! so everything is done on 256-bit integers widened to 512 bits for the
//! intermediate product.

use ethers::types::{U256, U512};
use serde::{Deserialize, Serialize};

use crate::error::FeeError;

pub const BPS_DENOMINATOR: u32 = 10_000;
pub const DEFAULT_FEE_BPS: u32 = 50;
pub const DEFAULT_COLLATERAL_BPS: u32 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FeeSchedule {
    #[serde(default = "default_fee_bps")]
    pub fee_bps: u32,
    #[serde(default = "default_collateral_bps")]
    pub collateral_bps: u32,
}

fn default_fee_bps() -> u32 {
    DEFAULT_FEE_BPS
}

fn default_collateral_bps() -> u32 {
    DEFAULT_COLLATERAL_BPS
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            fee_bps: DEFAULT_FEE_BPS,
            collateral_bps: DEFAULT_COLLATERAL_BPS,
        }
    }
}

/// Breakdown of what each party has to lock for one escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub amount: U256,
    pub fee: U256,
    pub collateral: U256,
    /// Value the depositor sends on creation: amount + fee.
    pub creation_total: U256,
    /// Value the receiver sends on acceptance: the collateral alone.
    pub acceptance_total: U256,
}

impl FeeSchedule {
    pub fn new(fee_bps: u32, collateral_bps: u32) -> Result<Self, FeeError> {
        let schedule = Self {
            fee_bps,
            collateral_bps,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn validate(&self) -> Result<(), FeeError> {
        for bps in [self.fee_bps, self.collateral_bps] {
            if bps > BPS_DENOMINATOR {
                return Err(FeeError::InvalidBasisPoints(bps));
            }
        }
        Ok(())
    }

    pub fn fee(&self, amount: U256) -> Result<U256, FeeError> {
        apply_bps(amount, self.fee_bps)
    }

    pub fn collateral(&self, amount: U256) -> Result<U256, FeeError> {
        apply_bps(amount, self.collateral_bps)
    }

    pub fn quote(&self, amount: U256) -> Result<FeeQuote, FeeError> {
        let fee = self.fee(amount)?;
        let collateral = self.collateral(amount)?;
        let creation_total = amount.checked_add(fee).ok_or(FeeError::Overflow)?;
        Ok(FeeQuote {
            amount,
            fee,
            collateral,
            creation_total,
            acceptance_total: collateral,
        })
    }
}

/// floor(amount * bps / 10000)
pub fn apply_bps(amount: U256, bps: u32) -> Result<U256, FeeError> {
    if bps > BPS_DENOMINATOR {
        return Err(FeeError::InvalidBasisPoints(bps));
    }
    let product = amount.full_mul(U256::from(bps));
    let quotient = product / U512::from(BPS_DENOMINATOR);
    U256::try_from(quotient).map_err(|_| FeeError::Overflow)
}
