use crate::{error::Error, storage::Auction, RESERVE_PRICE_DURATION};

/// Per-block price decrement, rounded up so the reserve is reached
/// within `duration` blocks.
pub fn decline_per_block(
    start_stake: i128,
    reserve_stake: i128,
    duration: u32,
) -> Result<i128, Error> {
    if duration == 0 {
        return Err(Error::InvalidAuctionParams);
    }
    let range = start_stake
        .checked_sub(reserve_stake)
        .ok_or(Error::ArithmeticOverflow)?;
    let duration = duration as i128;

    range
        .checked_add(duration - 1)
        .ok_or(Error::ArithmeticOverflow)?
        .checked_div(duration)
        .ok_or(Error::ArithmeticOverflow)
}

/// Price of one slot at block `now`.
/// Linear decline from `start_stake`, floored at `reserve_stake`.
pub fn current_price(auction: &Auction, now: u32) -> Result<i128, Error> {
    // Not started yet
    if now < auction.start {
        return Ok(auction.start_stake);
    }

    // Decline is over, reserve price window
    let decline_end = auction.end.saturating_sub(RESERVE_PRICE_DURATION);
    if now >= decline_end {
        return Ok(auction.reserve_stake);
    }

    let elapsed = (now - auction.start) as i128;
    let price_reduction = auction
        .decline_per_block
        .checked_mul(elapsed)
        .ok_or(Error::ArithmeticOverflow)?;

    let price = auction
        .start_stake
        .checked_sub(price_reduction)
        .ok_or(Error::ArithmeticOverflow)?;

    Ok(price.max(auction.reserve_stake))
}
