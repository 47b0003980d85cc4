//! Uniform clearing price over a snapshot of the bids.
//!
//! Bids are served in submission order. At price `p` a bid placed at
//! `price_at_bid >= p` wins `amount / p` slots, capped by what is left.
//! Starting from the price that would sell out every slot, the candidate
//! drops to the highest price at which some bidder could afford one more
//! slot, until supply is exhausted or the reserve is reached.

use soroban_sdk::Vec;

use crate::{error::Error, storage::BidEntry};

pub struct Allocation {
    /// Slots won per bid, same order as the bids.
    pub slots: Vec<u32>,
    pub slots_remaining: u32,
    /// Highest price at which a bidder could afford one more slot.
    pub max_next_price: i128,
}

pub struct Clearing {
    pub price: i128,
    pub allocation: Allocation,
    pub iterations: u32,
}

/// Allocate `slots_on_sale` at `price` in submission order. `price` must be positive.
pub fn allocate(bids: &Vec<BidEntry>, price: i128, slots_on_sale: u32) -> Allocation {
    let mut slots = Vec::new(bids.env());
    let mut slots_remaining = slots_on_sale;
    let mut max_next_price = 0;

    for bid in bids.iter() {
        let mut won: u32 = 0;
        if price <= bid.price_at_bid {
            let affordable = bid.amount / price;
            won = affordable.min(slots_remaining as i128) as u32;
            slots_remaining -= won;
        }

        let next_price = (bid.amount / (won as i128 + 1)).min(bid.price_at_bid);
        if next_price > max_next_price {
            max_next_price = next_price;
        }
        slots.push_back(won);
    }

    Allocation {
        slots,
        slots_remaining,
        max_next_price,
    }
}

/// Integer division rounding halves up.
fn div_round(numerator: i128, denominator: i128) -> Result<i128, Error> {
    numerator
        .checked_add(denominator / 2)
        .ok_or(Error::ArithmeticOverflow)?
        .checked_div(denominator)
        .ok_or(Error::ArithmeticOverflow)
}

pub fn clearing_price(
    bids: &Vec<BidEntry>,
    reserve_stake: i128,
    slots_on_sale: u32,
) -> Result<Clearing, Error> {
    if reserve_stake <= 0 || slots_on_sale == 0 {
        return Err(Error::InvalidAuctionParams);
    }

    let total = bids
        .iter()
        .try_fold(0i128, |acc, bid| acc.checked_add(bid.amount))
        .ok_or(Error::ArithmeticOverflow)?;

    // Every candidate is some amount / k capped by a bid price, and the
    // candidate strictly decreases, which bounds the number of rounds.
    let max_iterations = (bids.len() + 1).saturating_mul(slots_on_sale + 1);

    let mut price = div_round(total, slots_on_sale as i128)?.max(reserve_stake);
    let mut iterations = 0;
    loop {
        iterations += 1;
        let allocation = allocate(bids, price, slots_on_sale);

        if allocation.slots_remaining == 0 {
            return Ok(Clearing {
                price,
                allocation,
                iterations,
            });
        }

        if allocation.max_next_price < reserve_stake {
            // Supply does not clear, settle at the reserve
            let allocation = if price == reserve_stake {
                allocation
            } else {
                allocate(bids, reserve_stake, slots_on_sale)
            };
            return Ok(Clearing {
                price: reserve_stake,
                allocation,
                iterations,
            });
        }

        if iterations >= max_iterations {
            return Err(Error::ClearingDidNotConverge);
        }
        price = allocation.max_next_price;
    }
}
