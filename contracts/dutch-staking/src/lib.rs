#![no_std]
use soroban_sdk::{contract, contractimpl, log, token, Address, Env, Vec};

mod clearing;
mod error;
mod events;
mod price;
mod storage;

pub use error::Error;
pub use storage::{
    Auction, AuctionStatus, BidEntry, Config, Pledge, Pool, StakerDeposit, VirtualTokenHolder,
};

/// Upper bound on slots per auction; bounds every loop over bids and winners.
pub const MAX_SLOTS: u32 = 200;
/// Blocks the price stays at the reserve after the decline.
pub const RESERVE_PRICE_DURATION: u32 = 25;
/// Pool `reward_per_tok` is expressed per this many tokens.
pub const REWARD_PER_TOK_DENOMINATOR: i128 = 100_000;
/// Seconds after a lockup ends before the contract may be deleted.
pub const DELETE_PERIOD: u64 = 60 * 24 * 60 * 60;

#[contract]
pub struct DutchStaking;

#[contractimpl]
impl DutchStaking {
    /// Set the owner and the token staked and paid out as rewards.
    /// Can only be called once.
    pub fn initialize(env: Env, owner: Address, token: Address) -> Result<(), Error> {
        if storage::has_config(&env) {
            return Err(Error::AlreadyInitialized);
        }

        storage::write_config(&env, &Config { owner, token });
        storage::bump_instance(&env);

        Ok(())
    }

    /// Open a new auction and escrow `total_reward` from the owner.
    /// The reward per slot also distributes rewards left over from earlier auctions.
    pub fn initialise_auction(
        env: Env,
        caller: Address,
        start: u32,
        start_stake: i128,
        reserve_stake: i128,
        duration: u32,
        lockup_duration: u32,
        slots_on_sale: u32,
        total_reward: i128,
    ) -> Result<u64, Error> {
        let config = Self::require_owner(&env, &caller)?;

        // Only one auction at a time
        if storage::read_live_auction(&env).is_some() {
            return Err(Error::EndCurrentAuction);
        }

        // Validate auction parameters
        if reserve_stake <= 0
            || reserve_stake > start_stake
            || duration == 0
            || slots_on_sale == 0
            || slots_on_sale > MAX_SLOTS
            || total_reward < 0
        {
            return Err(Error::InvalidAuctionParams);
        }

        let decline_per_block = price::decline_per_block(start_stake, reserve_stake, duration)?;
        let end = start
            .checked_add(duration)
            .and_then(|block| block.checked_add(RESERVE_PRICE_DURATION))
            .ok_or(Error::ArithmeticOverflow)?;
        let lockup_end = end
            .checked_add(lockup_duration)
            .ok_or(Error::ArithmeticOverflow)?;

        let total_rewards = storage::total_auction_rewards(&env)
            .checked_add(total_reward)
            .ok_or(Error::ArithmeticOverflow)?;
        let reward_per_slot = total_rewards / slots_on_sale as i128;

        let aid = storage::current_aid(&env)
            .checked_add(1)
            .ok_or(Error::ArithmeticOverflow)?;

        Self::transfer_in(&env, &config.token, &caller, total_reward);

        let auction = Auction {
            aid,
            start,
            end,
            lockup_end,
            start_stake,
            reserve_stake,
            decline_per_block,
            slots_on_sale,
            slots_sold: 0,
            final_price: 0,
            reward_per_slot,
            status: AuctionStatus::Open,
        };

        storage::write_total_auction_rewards(&env, total_rewards);
        storage::write_current_aid(&env, aid);
        storage::write_auction(&env, &auction);
        storage::clear_round(&env);
        storage::bump_instance(&env);

        events::new_auction(&env, &auction);
        log!(&env, "auction initialised", aid, start, end, slots_on_sale);

        Ok(aid)
    }

    /// Bid for slots at the current price.
    /// With `topup == 0` the bid is the larger of the current price and the
    /// staker's deposit, otherwise the deposit plus `topup`.
    /// Only the part not already deposited is transferred. Returns the bid amount.
    /// A pool registered for the current auction bids through `bid_pledged_stake`
    /// or `bid_pledged_and_self_stake` so its pledges back the bid.
    pub fn bid(env: Env, staker: Address, topup: i128) -> Result<i128, Error> {
        let config = storage::read_config(&env)?;
        staker.require_auth();

        // Pledges and rewards count towards a pool's lockup only when they back its bid
        let aid = storage::current_aid(&env);
        if storage::read_pool(&env, &staker).is_some_and(|record| record.aid == aid) {
            return Err(Error::PoolMustBidPledges);
        }

        Self::place_bid(&env, &config, &staker, topup, 0, true)
    }

    /// Finalise the auction at `price`, which must be the clearing price.
    /// Anyone may call this once supply clears at `price` or the auction has ended.
    pub fn finalise_auction(env: Env, price: i128) -> Result<(), Error> {
        storage::read_config(&env)?;

        let mut auction = storage::read_auction(&env)
            .filter(|auction| auction.status == AuctionStatus::Open)
            .ok_or(Error::NotOpenForFinalisation)?;

        let now = env.ledger().sequence();
        if price < price::current_price(&auction, now)? {
            return Err(Error::SuggestedSolutionBelowCurrentPrice);
        }

        let bids = storage::read_bids(&env);
        let clearing =
            clearing::clearing_price(&bids, auction.reserve_stake, auction.slots_on_sale)?;

        if clearing.price != price {
            return Err(Error::FinalPriceDoesNotClear);
        }
        // Before the end the result is only certain once supply is exhausted
        if now < auction.end && clearing.allocation.slots_remaining > 0 {
            return Err(Error::FinalPriceDoesNotClear);
        }

        let mut winners = Vec::new(&env);
        for (bid, slots) in bids.iter().zip(clearing.allocation.slots.iter()) {
            if slots == 0 {
                continue;
            }
            let mut deposit = storage::read_deposit(&env, &bid.staker);
            deposit.winning_slots = slots;
            storage::write_deposit(&env, &bid.staker, &deposit);
            winners.push_back(bid.staker);
        }

        auction.final_price = price;
        auction.slots_sold = auction.slots_on_sale - clearing.allocation.slots_remaining;
        auction.status = AuctionStatus::Finalised;

        storage::write_auction(&env, &auction);
        storage::write_winners(&env, &winners);
        storage::bump_instance(&env);

        events::auction_finalised(&env, auction.aid, price, auction.slots_sold);
        log!(
            &env,
            "auction finalised",
            auction.aid,
            price,
            auction.slots_sold,
            clearing.iterations
        );

        Ok(())
    }

    /// Release the lockup and pay every winner its share of the auction rewards.
    pub fn end_lockup(env: Env) -> Result<(), Error> {
        storage::read_config(&env)?;

        let mut auction = storage::read_auction(&env)
            .filter(|auction| auction.status == AuctionStatus::Finalised)
            .ok_or(Error::AuctionNotFinalised)?;

        if env.ledger().sequence() < auction.lockup_end {
            return Err(Error::LockupNotOver);
        }

        let rewards_paid = Self::pay_out_rewards(&env, &auction)?;
        Self::reset_virtual_deposits(&env);
        Self::close_round(&env, rewards_paid)?;

        auction.status = AuctionStatus::LockupEnded;
        storage::write_auction(&env, &auction);

        events::lockup_ended(&env, auction.aid, rewards_paid);
        log!(&env, "lockup ended", auction.aid, rewards_paid);

        Ok(())
    }

    /// Cancel the running auction. With `payout_rewards` the winners of a
    /// finalised auction are paid as if the lockup had ended.
    pub fn abort_auction(env: Env, caller: Address, payout_rewards: bool) -> Result<(), Error> {
        Self::require_owner(&env, &caller)?;

        let auction = storage::read_live_auction(&env).ok_or(Error::NoAuctionToAbort)?;

        let rewards_paid = if payout_rewards {
            Self::pay_out_rewards(&env, &auction)?
        } else {
            for winner in storage::read_winners(&env).iter() {
                let mut deposit = storage::read_deposit(&env, &winner);
                deposit.winning_slots = 0;
                storage::write_deposit(&env, &winner, &deposit);
            }
            0
        };

        Self::reset_virtual_deposits(&env);
        Self::close_round(&env, rewards_paid)?;
        storage::remove_auction(&env);

        events::auction_aborted(&env, auction.aid, payout_rewards);
        log!(&env, "auction aborted", auction.aid, rewards_paid);

        Ok(())
    }

    /// Withdraw the part of the deposit that is not locked up.
    /// Virtual token holders withdraw their earned rewards instead.
    pub fn withdraw_self_stake(env: Env, staker: Address) -> Result<i128, Error> {
        let config = storage::read_config(&env)?;
        staker.require_auth();

        let mut holder = storage::read_virtual_holder(&env, &staker);
        if holder.is_holder {
            let rewards = holder.rewards;
            if rewards > 0 {
                holder.rewards = 0;
                storage::write_virtual_holder(&env, &staker, &holder);
                Self::transfer_out(&env, &config.token, &staker, rewards);
            }
            return Ok(rewards);
        }

        let needed = Self::self_stake_needed(&env, &staker)?;
        let mut deposit = storage::read_deposit(&env, &staker);
        let payout = deposit
            .amount
            .checked_sub(needed)
            .ok_or(Error::ArithmeticOverflow)?
            .max(0);

        if payout > 0 {
            deposit.amount -= payout;
            storage::write_deposit(&env, &staker, &deposit);
            Self::transfer_out(&env, &config.token, &staker, payout);
        }

        Ok(payout)
    }

    /// Register `pool` for auction `aid` and escrow its `total_reward`.
    /// Pledgers earn `amount * reward_per_tok / REWARD_PER_TOK_DENOMINATOR`.
    pub fn register_pool(
        env: Env,
        pool: Address,
        aid: u64,
        max_stake: i128,
        total_reward: i128,
        reward_per_tok: i128,
    ) -> Result<(), Error> {
        let config = storage::read_config(&env)?;
        pool.require_auth();

        if storage::read_virtual_holder(&env, &pool).is_holder {
            return Err(Error::NotAllowedForVirtualTokenHolders);
        }
        if max_stake <= 0 || reward_per_tok <= 0 || total_reward < 0 {
            return Err(Error::InvalidAmount);
        }

        let auction = Self::bidding_auction(&env)?;
        if aid != auction.aid {
            return Err(Error::InvalidAuctionId);
        }

        if let Some(existing) = storage::read_pool(&env, &pool) {
            if existing.aid == aid {
                return Err(Error::PoolAlreadyRegistered);
            }
            if existing.remaining_reward > 0 {
                return Err(Error::UnclaimedPoolRewards);
            }
        }
        if storage::read_deposit(&env, &pool).aid == aid {
            return Err(Error::SenderAlreadyBid);
        }

        Self::transfer_in(&env, &config.token, &pool, total_reward);

        storage::write_pool(
            &env,
            &pool,
            &Pool {
                max_stake,
                total_reward,
                remaining_reward: total_reward,
                reward_per_tok,
                pool_deposit: 0,
                aid,
            },
        );

        events::new_pool(&env, aid, &pool, total_reward, reward_per_tok);
        log!(&env, "pool registered", pool, aid, total_reward);

        Ok(())
    }

    /// Pledge `amount` to `pool` for auction `aid`.
    /// A pledge left from an earlier auction funds the new one; only the
    /// difference is transferred or refunded.
    pub fn pledge_stake(
        env: Env,
        pledger: Address,
        aid: u64,
        pool: Address,
        amount: i128,
    ) -> Result<(), Error> {
        let config = storage::read_config(&env)?;
        pledger.require_auth();

        // Validate pledger and amount
        if storage::read_virtual_holder(&env, &pledger).is_holder {
            return Err(Error::NotAllowedForVirtualTokenHolders);
        }
        if amount <= 0 {
            return Err(Error::InvalidAmount);
        }

        let auction = Self::bidding_auction(&env)?;
        if aid != auction.aid {
            return Err(Error::InvalidAuctionId);
        }
        let mut record = Self::open_pool(&env, &pool, aid)?;

        // A pledge from an earlier auction is rolled over
        let prior = match storage::read_pledge(&env, &pledger) {
            Some(pledge) if pledge.aid == aid && pledge.pool != pool => {
                return Err(Error::CannotChangePool)
            }
            Some(pledge) if pledge.aid == aid => return Err(Error::AlreadyPledged),
            Some(pledge) => pledge.amount,
            None => 0,
        };

        // Check the pool can still pay the reward
        let reward = Self::pledge_reward(amount, record.reward_per_tok)?;
        if reward > record.remaining_reward {
            return Err(Error::RewardsDepleted);
        }

        record.pool_deposit = record
            .pool_deposit
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow)?;
        record.remaining_reward -= reward;

        Self::settle_difference(&env, &config.token, &pledger, prior, amount);

        storage::write_pool(&env, &pool, &record);
        storage::write_pledge(
            &env,
            &pledger,
            &Pledge {
                amount: amount + reward,
                reward,
                aid,
                pool: pool.clone(),
            },
        );

        events::new_pledge(&env, aid, &pledger, &pool, amount);

        Ok(())
    }

    /// Change the principal of the pledge made in the current auction to `new_amount`.
    pub fn increase_pledge(
        env: Env,
        pledger: Address,
        pool: Address,
        new_amount: i128,
    ) -> Result<(), Error> {
        let config = storage::read_config(&env)?;
        pledger.require_auth();

        // Validate amount
        if new_amount <= 0 {
            return Err(Error::InvalidAmount);
        }

        let auction = Self::bidding_auction(&env)?;
        let mut pledge = storage::read_pledge(&env, &pledger)
            .filter(|pledge| pledge.aid == auction.aid)
            .ok_or(Error::NoPledgeInThisAuction)?;
        if pledge.pool != pool {
            return Err(Error::CannotChangePool);
        }
        let mut record = Self::open_pool(&env, &pool, auction.aid)?;

        let old_amount = pledge.amount - pledge.reward;
        let new_reward = Self::pledge_reward(new_amount, record.reward_per_tok)?;
        let available = record
            .remaining_reward
            .checked_add(pledge.reward)
            .ok_or(Error::ArithmeticOverflow)?;
        if new_reward > available {
            return Err(Error::RewardsDepleted);
        }

        // Swap the old principal and reward for the new ones
        record.pool_deposit = record
            .pool_deposit
            .checked_sub(old_amount)
            .and_then(|deposit| deposit.checked_add(new_amount))
            .ok_or(Error::ArithmeticOverflow)?;
        record.remaining_reward = available - new_reward;
        pledge.amount = new_amount + new_reward;
        pledge.reward = new_reward;

        Self::settle_difference(&env, &config.token, &pledger, old_amount, new_amount);

        storage::write_pool(&env, &pool, &record);
        storage::write_pledge(&env, &pledger, &pledge);

        events::new_pledge(&env, auction.aid, &pledger, &pool, new_amount);

        Ok(())
    }

    /// Pay out a pledge with its reward once its auction is over.
    /// Returns 0 and leaves the pledge in place while the auction is running.
    pub fn withdraw_pledged_stake(env: Env, pledger: Address) -> Result<i128, Error> {
        let config = storage::read_config(&env)?;
        pledger.require_auth();

        let Some(pledge) = storage::read_pledge(&env, &pledger) else {
            return Ok(0);
        };
        if let Some(auction) = storage::read_live_auction(&env) {
            if auction.aid == pledge.aid {
                return Ok(0);
            }
        }

        storage::remove_pledge(&env, &pledger);
        Self::transfer_out(&env, &config.token, &pledger, pledge.amount);

        Ok(pledge.amount)
    }

    /// Bid with the pledges and rewards collected by `pool` plus its own deposit.
    /// Nothing is transferred; fails if those funds are below the current price.
    pub fn bid_pledged_stake(env: Env, pool: Address) -> Result<i128, Error> {
        let config = storage::read_config(&env)?;
        pool.require_auth();

        let collateral = Self::registered_collateral(&env, &pool)?;
        Self::place_bid(&env, &config, &pool, 0, collateral, false)
    }

    /// Like `bid_pledged_stake`, with `extra` operator stake on top.
    /// `extra == 0` tops up to the current price when needed.
    pub fn bid_pledged_and_self_stake(env: Env, pool: Address, extra: i128) -> Result<i128, Error> {
        let config = storage::read_config(&env)?;
        pool.require_auth();

        let collateral = Self::registered_collateral(&env, &pool)?;
        Self::place_bid(&env, &config, &pool, extra, collateral, true)
    }

    /// Move rewards no pledger claimed into the pool's own deposit.
    /// Allowed once bidding has closed for the pool's auction.
    pub fn retrieve_unclaimed_pool_rewards(env: Env, pool: Address) -> Result<i128, Error> {
        storage::read_config(&env)?;
        pool.require_auth();

        let mut record = storage::read_pool(&env, &pool).ok_or(Error::NotARegisteredPool)?;
        if let Some(auction) = storage::read_auction(&env) {
            if auction.aid == record.aid && auction.is_bidding(env.ledger().sequence()) {
                return Err(Error::BiddingNotClosed);
            }
        }

        let unclaimed = record.remaining_reward;
        if unclaimed == 0 {
            return Ok(0);
        }

        record.total_reward -= unclaimed;
        record.remaining_reward = 0;
        storage::write_pool(&env, &pool, &record);

        let mut deposit = storage::read_deposit(&env, &pool);
        deposit.amount = deposit
            .amount
            .checked_add(unclaimed)
            .ok_or(Error::ArithmeticOverflow)?;
        storage::write_deposit(&env, &pool, &deposit);

        log!(&env, "unclaimed pool rewards retrieved", pool, unclaimed);

        Ok(unclaimed)
    }

    /// Grant or revoke virtual tokens. Revoking credits the earned rewards to
    /// the deposit with `preserve_rewards`, else returns them to the auction rewards.
    pub fn set_virt_token_holder(
        env: Env,
        caller: Address,
        holder: Address,
        enabled: bool,
        limit: i128,
        preserve_rewards: bool,
    ) -> Result<(), Error> {
        Self::require_owner(&env, &caller)?;

        if limit < 0 {
            return Err(Error::InvalidAmount);
        }

        let mut record = storage::read_virtual_holder(&env, &holder);
        let mut deposit = storage::read_deposit(&env, &holder);
        // Real and virtual deposits must never mix
        if deposit.amount > 0 && record.is_holder != enabled {
            return Err(Error::DepositNotEmpty);
        }

        record.limit = limit;
        if enabled {
            record.is_holder = true;
        } else {
            let rewards = record.rewards;
            record.is_holder = false;
            record.rewards = 0;

            if rewards > 0 {
                if preserve_rewards {
                    deposit.amount = deposit
                        .amount
                        .checked_add(rewards)
                        .ok_or(Error::ArithmeticOverflow)?;
                    storage::write_deposit(&env, &holder, &deposit);
                } else {
                    let total = storage::total_auction_rewards(&env)
                        .checked_add(rewards)
                        .ok_or(Error::ArithmeticOverflow)?;
                    storage::write_total_auction_rewards(&env, total);
                }
            }
        }

        storage::write_virtual_holder(&env, &holder, &record);
        log!(&env, "virtual token holder updated", holder, enabled, limit);

        Ok(())
    }

    /// Set how many virtual tokens `holder` may bid over its lifetime.
    pub fn set_virt_token_limit(
        env: Env,
        caller: Address,
        holder: Address,
        limit: i128,
    ) -> Result<(), Error> {
        Self::require_owner(&env, &caller)?;

        // Validate limit
        if limit < 0 {
            return Err(Error::InvalidAmount);
        }

        let mut record = storage::read_virtual_holder(&env, &holder);
        record.limit = limit;
        storage::write_virtual_holder(&env, &holder, &record);

        Ok(())
    }

    /// Send the rewards no auction has distributed back to the owner.
    pub fn retrieve_undistributed_rewards(env: Env, caller: Address) -> Result<i128, Error> {
        let config = Self::require_owner(&env, &caller)?;

        if storage::read_live_auction(&env).is_some() {
            return Err(Error::EndCurrentAuction);
        }

        let amount = storage::total_auction_rewards(&env);
        storage::write_total_auction_rewards(&env, 0);
        Self::transfer_out(&env, &config.token, &config.owner, amount);

        Ok(amount)
    }

    /// Sweep the whole balance to the owner and disable the contract.
    pub fn delete_contract(env: Env, caller: Address) -> Result<(), Error> {
        let config = Self::require_owner(&env, &caller)?;

        if storage::read_live_auction(&env).is_some() {
            return Err(Error::EndCurrentAuction);
        }
        // Stakers get the delete period to withdraw after the last lockup
        if env.ledger().timestamp() < storage::earliest_delete(&env) {
            return Err(Error::EarliestDeleteNotReached);
        }

        let balance = token::Client::new(&env, &config.token).balance(&env.current_contract_address());
        Self::transfer_out(&env, &config.token, &config.owner, balance);
        storage::mark_deleted(&env);

        log!(&env, "contract deleted", balance);

        Ok(())
    }

    /// Owner and token of the contract.
    pub fn get_config(env: Env) -> Result<Config, Error> {
        storage::read_config(&env)
    }

    /// Id of the latest auction, 0 before the first one.
    pub fn current_aid(env: Env) -> u64 {
        storage::current_aid(&env)
    }

    /// The current auction, `None` before the first one or after an abort.
    pub fn get_auction(env: Env) -> Option<Auction> {
        storage::read_auction(&env)
    }

    /// Bids of the current auction in the order they were placed.
    pub fn get_bids(env: Env) -> Vec<BidEntry> {
        storage::read_bids(&env)
    }

    /// Current slot price, 0 when no auction is open or finalised.
    pub fn get_current_price(env: Env) -> Result<i128, Error> {
        match storage::read_live_auction(&env) {
            Some(auction) => price::current_price(&auction, env.ledger().sequence()),
            None => Ok(0),
        }
    }

    /// Whether the current auction still accepts bids.
    pub fn is_bidding_phase(env: Env) -> bool {
        storage::read_auction(&env)
            .map(|auction| auction.is_bidding(env.ledger().sequence()))
            .unwrap_or(false)
    }

    /// Whether the current auction has a final price, including after its lockup.
    pub fn is_finalised(env: Env) -> bool {
        storage::read_auction(&env)
            .map(|auction| auction.status != AuctionStatus::Open)
            .unwrap_or(false)
    }

    /// Winning stakers of the finalised auction, in bid order.
    /// The list holds only winners and is not padded up to `slots_on_sale`;
    /// at most `MAX_SLOTS` addresses are returned.
    pub fn get_final_stakers(env: Env) -> Vec<Address> {
        storage::read_winners(&env)
    }

    /// Slots won by `staker` in the last finalised auction.
    /// Fails while the staker's bid is in an auction that is still open.
    pub fn get_final_staker_slots(env: Env, staker: Address) -> Result<u32, Error> {
        let deposit = storage::read_deposit(&env, &staker);
        if let Some(auction) = storage::read_auction(&env) {
            if auction.status == AuctionStatus::Open && deposit.aid == auction.aid {
                return Err(Error::SlotsNotFinal);
            }
        }
        Ok(deposit.winning_slots)
    }

    /// Deposit record of `staker`, zeroed when it never bid.
    pub fn get_deposit(env: Env, staker: Address) -> StakerDeposit {
        storage::read_deposit(&env, &staker)
    }

    /// Amount deposited by `staker`, locked or not.
    pub fn self_staker_deposit(env: Env, staker: Address) -> i128 {
        storage::read_deposit(&env, &staker).amount
    }

    /// Latest registration of `pool`.
    pub fn get_pool(env: Env, pool: Address) -> Option<Pool> {
        storage::read_pool(&env, &pool)
    }

    /// Pledge held by `pledger`, if any.
    pub fn get_pledge(env: Env, pledger: Address) -> Option<Pledge> {
        storage::read_pledge(&env, &pledger)
    }

    /// Virtual token record of `holder`.
    pub fn get_virt_token_holder(env: Env, holder: Address) -> VirtualTokenHolder {
        storage::read_virtual_holder(&env, &holder)
    }

    /// Rewards escrowed for the current and future auctions.
    pub fn total_auction_rewards(env: Env) -> i128 {
        storage::total_auction_rewards(&env)
    }

    /// Ledger timestamp from which the owner may delete the contract.
    pub fn earliest_delete(env: Env) -> u64 {
        storage::earliest_delete(&env)
    }

    /// Part of the staker's deposit locked by the finalised auction.
    pub fn calculate_self_stake_needed(env: Env, staker: Address) -> Result<i128, Error> {
        Self::self_stake_needed(&env, &staker)
    }
}

impl DutchStaking {
    fn require_owner(env: &Env, caller: &Address) -> Result<Config, Error> {
        let config = storage::read_config(env)?;
        caller.require_auth();

        if *caller != config.owner {
            return Err(Error::OwnerOnly);
        }
        Ok(config)
    }

    fn bidding_auction(env: &Env) -> Result<Auction, Error> {
        storage::read_auction(env)
            .filter(|auction| auction.is_bidding(env.ledger().sequence()))
            .ok_or(Error::NotInBiddingPhase)
    }

    /// Pull `amount` through the allowance granted to this contract.
    fn transfer_in(env: &Env, token: &Address, from: &Address, amount: i128) {
        if amount > 0 {
            let contract = env.current_contract_address();
            token::Client::new(env, token).transfer_from(&contract, from, &contract, &amount);
        }
    }

    fn transfer_out(env: &Env, token: &Address, to: &Address, amount: i128) {
        if amount > 0 {
            token::Client::new(env, token).transfer(&env.current_contract_address(), to, &amount);
        }
    }

    fn settle_difference(env: &Env, token: &Address, account: &Address, held: i128, owed: i128) {
        if owed > held {
            Self::transfer_in(env, token, account, owed - held);
        } else if held > owed {
            Self::transfer_out(env, token, account, held - owed);
        }
    }

    fn pledge_reward(amount: i128, reward_per_tok: i128) -> Result<i128, Error> {
        amount
            .checked_mul(reward_per_tok)
            .ok_or(Error::ArithmeticOverflow)
            .map(|scaled| scaled / REWARD_PER_TOK_DENOMINATOR)
    }

    /// Pool registered for `aid` that has not bid yet.
    fn open_pool(env: &Env, pool: &Address, aid: u64) -> Result<Pool, Error> {
        let record = storage::read_pool(env, pool)
            .filter(|record| record.aid == aid)
            .ok_or(Error::NotARegisteredPool)?;
        if storage::read_deposit(env, pool).aid == aid {
            return Err(Error::PoolAlreadyBid);
        }
        Ok(record)
    }

    fn registered_collateral(env: &Env, pool: &Address) -> Result<i128, Error> {
        let aid = storage::current_aid(env);
        storage::read_pool(env, pool)
            .filter(|record| record.aid == aid)
            .ok_or(Error::NotARegisteredPool)?
            .collateral()
    }

    /// Record a bid of the staker's deposit plus `collateral` (and `topup`).
    /// Without `allow_transfer` the bid must be covered by existing funds.
    fn place_bid(
        env: &Env,
        config: &Config,
        staker: &Address,
        topup: i128,
        collateral: i128,
        allow_transfer: bool,
    ) -> Result<i128, Error> {
        if topup < 0 {
            return Err(Error::InvalidAmount);
        }

        let now = env.ledger().sequence();
        let mut auction = Self::bidding_auction(env)?;

        let mut deposit = storage::read_deposit(env, staker);
        if deposit.aid == auction.aid {
            return Err(Error::SenderAlreadyBid);
        }

        let current_price = price::current_price(&auction, now)?;
        let funds = deposit
            .amount
            .checked_add(collateral)
            .ok_or(Error::ArithmeticOverflow)?;
        let amount = if topup == 0 {
            current_price.max(funds)
        } else {
            funds.checked_add(topup).ok_or(Error::ArithmeticOverflow)?
        };
        if amount < current_price {
            return Err(Error::BidBelowCurrentPrice);
        }
        let added = amount - funds;

        let mut holder = storage::read_virtual_holder(env, staker);
        if holder.is_holder {
            let used = holder
                .used
                .checked_add(added)
                .ok_or(Error::ArithmeticOverflow)?;
            if used > holder.limit {
                return Err(Error::VirtualTokensAboveLimit);
            }
            holder.used = used;
            storage::write_virtual_holder(env, staker, &holder);
        } else if added > 0 {
            if !allow_transfer {
                return Err(Error::BidBelowCurrentPrice);
            }
            Self::transfer_in(env, &config.token, staker, added);
        }

        deposit.amount += added;
        deposit.aid = auction.aid;
        deposit.winning_slots = 0;
        storage::write_deposit(env, staker, &deposit);

        let mut bids = storage::read_bids(env);
        bids.push_back(BidEntry {
            staker: staker.clone(),
            amount,
            price_at_bid: current_price,
        });

        // Bidding closes once the current price already sells every slot
        let allocation = clearing::allocate(&bids, current_price, auction.slots_on_sale);
        auction.slots_sold = auction.slots_on_sale - allocation.slots_remaining;

        storage::write_bids(env, &bids);
        storage::write_auction(env, &auction);
        storage::bump_instance(env);

        events::bid(env, auction.aid, staker, amount, current_price);
        log!(env, "bid", staker.clone(), amount, current_price, auction.slots_sold);

        Ok(amount)
    }

    /// Credit each winner `winning_slots * reward_per_slot`. Returns the total paid.
    fn pay_out_rewards(env: &Env, auction: &Auction) -> Result<i128, Error> {
        let mut total: i128 = 0;

        for winner in storage::read_winners(env).iter() {
            let mut deposit = storage::read_deposit(env, &winner);
            let reward = (deposit.winning_slots as i128)
                .checked_mul(auction.reward_per_slot)
                .ok_or(Error::ArithmeticOverflow)?;

            let mut holder = storage::read_virtual_holder(env, &winner);
            if holder.is_holder {
                holder.rewards = holder
                    .rewards
                    .checked_add(reward)
                    .ok_or(Error::ArithmeticOverflow)?;
                storage::write_virtual_holder(env, &winner, &holder);
                deposit.amount = 0;
            } else {
                deposit.amount = deposit
                    .amount
                    .checked_add(reward)
                    .ok_or(Error::ArithmeticOverflow)?;
            }
            deposit.winning_slots = 0;
            storage::write_deposit(env, &winner, &deposit);

            total = total.checked_add(reward).ok_or(Error::ArithmeticOverflow)?;
        }

        Ok(total)
    }

    /// Virtual deposits only live for one auction.
    fn reset_virtual_deposits(env: &Env) {
        for bid in storage::read_bids(env).iter() {
            if !storage::read_virtual_holder(env, &bid.staker).is_holder {
                continue;
            }
            let mut deposit = storage::read_deposit(env, &bid.staker);
            if deposit.amount != 0 {
                deposit.amount = 0;
                storage::write_deposit(env, &bid.staker, &deposit);
            }
        }
    }

    fn close_round(env: &Env, rewards_paid: i128) -> Result<(), Error> {
        let remaining = storage::total_auction_rewards(env)
            .checked_sub(rewards_paid)
            .ok_or(Error::ArithmeticOverflow)?;
        let earliest_delete = env
            .ledger()
            .timestamp()
            .checked_add(DELETE_PERIOD)
            .ok_or(Error::ArithmeticOverflow)?;

        storage::write_total_auction_rewards(env, remaining);
        storage::write_earliest_delete(env, earliest_delete);
        storage::clear_round(env);
        storage::bump_instance(env);

        Ok(())
    }

    fn self_stake_needed(env: &Env, staker: &Address) -> Result<i128, Error> {
        let deposit = storage::read_deposit(env, staker);
        let Some(auction) = storage::read_auction(env) else {
            return Ok(0);
        };
        if deposit.aid != auction.aid {
            return Ok(0);
        }

        match auction.status {
            AuctionStatus::Open => Err(Error::BidderNotFinalised),
            AuctionStatus::LockupEnded => Ok(0),
            AuctionStatus::Finalised => {
                let locked = (deposit.winning_slots as i128)
                    .checked_mul(auction.final_price)
                    .ok_or(Error::ArithmeticOverflow)?;
                // A pool's pledges and rewards are locked before its own stake
                let collateral = match storage::read_pool(env, staker) {
                    Some(record) if record.aid == auction.aid => record.collateral()?,
                    _ => 0,
                };
                Ok(locked.saturating_sub(collateral).max(0))
            }
        }
    }
}
