use soroban_sdk::{contracttype, Address, Env, Vec};

use crate::error::Error;

// ~1 day and ~30 days of 5s ledgers
const BUMP_THRESHOLD: u32 = 17_280;
const BUMP_AMOUNT: u32 = 518_400;

#[derive(Clone)]
#[contracttype]
pub enum DataKey {
    Config,
    CurrentAid,
    Auction,
    Bids,
    Winners,
    TotalAuctionRewards,
    EarliestDelete,
    Deleted,
    Deposit(Address),
    Pool(Address),
    Pledge(Address),
    VirtualHolder(Address),
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub owner: Address,
    pub token: Address,
}

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuctionStatus {
    Open = 0,
    Finalised = 1,
    LockupEnded = 2,
}

/// One staking auction. Block numbers are ledger sequence numbers.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Auction {
    pub aid: u64,
    pub start: u32,
    /// End of the price decline plus the reserve price window.
    pub end: u32,
    pub lockup_end: u32,
    pub start_stake: i128,
    pub reserve_stake: i128,
    pub decline_per_block: i128,
    pub slots_on_sale: u32,
    pub slots_sold: u32,
    pub final_price: i128,
    pub reward_per_slot: i128,
    pub status: AuctionStatus,
}

impl Auction {
    /// Still accepting bids: open, before `end` and supply not yet cleared.
    pub fn is_bidding(&self, now: u32) -> bool {
        self.status == AuctionStatus::Open && now < self.end && self.slots_sold < self.slots_on_sale
    }

    /// Open or finalised, i.e. the lockup has not ended yet.
    pub fn is_live(&self) -> bool {
        self.status != AuctionStatus::LockupEnded
    }
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BidEntry {
    pub staker: Address,
    pub amount: i128,
    pub price_at_bid: i128,
}

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StakerDeposit {
    pub amount: i128,
    /// Auction the staker last bid in.
    pub aid: u64,
    pub winning_slots: u32,
}

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Pool {
    pub max_stake: i128,
    pub total_reward: i128,
    pub remaining_reward: i128,
    pub reward_per_tok: i128,
    /// Pledged principal collected for `aid`.
    pub pool_deposit: i128,
    pub aid: u64,
}

impl Pool {
    /// Funds the pool commits to its bid on top of its own deposit.
    pub fn collateral(&self) -> Result<i128, Error> {
        self.pool_deposit
            .checked_add(self.total_reward)
            .ok_or(Error::ArithmeticOverflow)
    }
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Pledge {
    /// Principal plus reward.
    pub amount: i128,
    pub reward: i128,
    pub aid: u64,
    pub pool: Address,
}

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VirtualTokenHolder {
    pub is_holder: bool,
    pub limit: i128,
    pub rewards: i128,
    pub used: i128,
}

pub fn bump_instance(env: &Env) {
    env.storage().instance().extend_ttl(BUMP_THRESHOLD, BUMP_AMOUNT);
}

pub fn has_config(env: &Env) -> bool {
    env.storage().instance().has(&DataKey::Config)
}

pub fn read_config(env: &Env) -> Result<Config, Error> {
    if env.storage().instance().has(&DataKey::Deleted) {
        return Err(Error::ContractDeleted);
    }
    env.storage()
        .instance()
        .get(&DataKey::Config)
        .ok_or(Error::NotInitialized)
}

pub fn write_config(env: &Env, config: &Config) {
    env.storage().instance().set(&DataKey::Config, config);
}

pub fn mark_deleted(env: &Env) {
    env.storage().instance().set(&DataKey::Deleted, &true);
}

pub fn current_aid(env: &Env) -> u64 {
    env.storage().instance().get(&DataKey::CurrentAid).unwrap_or(0)
}

pub fn write_current_aid(env: &Env, aid: u64) {
    env.storage().instance().set(&DataKey::CurrentAid, &aid);
}

pub fn read_auction(env: &Env) -> Option<Auction> {
    env.storage().instance().get(&DataKey::Auction)
}

/// The auction if it is still open or finalised.
pub fn read_live_auction(env: &Env) -> Option<Auction> {
    read_auction(env).filter(Auction::is_live)
}

pub fn write_auction(env: &Env, auction: &Auction) {
    env.storage().instance().set(&DataKey::Auction, auction);
}

pub fn remove_auction(env: &Env) {
    env.storage().instance().remove(&DataKey::Auction);
}

pub fn read_bids(env: &Env) -> Vec<BidEntry> {
    env.storage()
        .instance()
        .get(&DataKey::Bids)
        .unwrap_or(Vec::new(env))
}

pub fn write_bids(env: &Env, bids: &Vec<BidEntry>) {
    env.storage().instance().set(&DataKey::Bids, bids);
}

pub fn read_winners(env: &Env) -> Vec<Address> {
    env.storage()
        .instance()
        .get(&DataKey::Winners)
        .unwrap_or(Vec::new(env))
}

pub fn write_winners(env: &Env, winners: &Vec<Address>) {
    env.storage().instance().set(&DataKey::Winners, winners);
}

pub fn clear_round(env: &Env) {
    env.storage().instance().remove(&DataKey::Bids);
    env.storage().instance().remove(&DataKey::Winners);
}

pub fn total_auction_rewards(env: &Env) -> i128 {
    env.storage()
        .instance()
        .get(&DataKey::TotalAuctionRewards)
        .unwrap_or(0)
}

pub fn write_total_auction_rewards(env: &Env, amount: i128) {
    env.storage()
        .instance()
        .set(&DataKey::TotalAuctionRewards, &amount);
}

pub fn earliest_delete(env: &Env) -> u64 {
    env.storage()
        .instance()
        .get(&DataKey::EarliestDelete)
        .unwrap_or(0)
}

pub fn write_earliest_delete(env: &Env, timestamp: u64) {
    env.storage()
        .instance()
        .set(&DataKey::EarliestDelete, &timestamp);
}

fn bump_persistent(env: &Env, key: &DataKey) {
    env.storage()
        .persistent()
        .extend_ttl(key, BUMP_THRESHOLD, BUMP_AMOUNT);
}

pub fn read_deposit(env: &Env, staker: &Address) -> StakerDeposit {
    let key = DataKey::Deposit(staker.clone());
    match env.storage().persistent().get(&key) {
        Some(deposit) => {
            bump_persistent(env, &key);
            deposit
        }
        None => StakerDeposit::default(),
    }
}

pub fn write_deposit(env: &Env, staker: &Address, deposit: &StakerDeposit) {
    let key = DataKey::Deposit(staker.clone());
    env.storage().persistent().set(&key, deposit);
    bump_persistent(env, &key);
}

pub fn read_pool(env: &Env, pool: &Address) -> Option<Pool> {
    let key = DataKey::Pool(pool.clone());
    let record: Option<Pool> = env.storage().persistent().get(&key);
    if record.is_some() {
        bump_persistent(env, &key);
    }
    record
}

pub fn write_pool(env: &Env, pool: &Address, record: &Pool) {
    let key = DataKey::Pool(pool.clone());
    env.storage().persistent().set(&key, record);
    bump_persistent(env, &key);
}

pub fn read_pledge(env: &Env, pledger: &Address) -> Option<Pledge> {
    let key = DataKey::Pledge(pledger.clone());
    let pledge: Option<Pledge> = env.storage().persistent().get(&key);
    if pledge.is_some() {
        bump_persistent(env, &key);
    }
    pledge
}

pub fn write_pledge(env: &Env, pledger: &Address, pledge: &Pledge) {
    let key = DataKey::Pledge(pledger.clone());
    env.storage().persistent().set(&key, pledge);
    bump_persistent(env, &key);
}

pub fn remove_pledge(env: &Env, pledger: &Address) {
    env.storage()
        .persistent()
        .remove(&DataKey::Pledge(pledger.clone()));
}

pub fn read_virtual_holder(env: &Env, holder: &Address) -> VirtualTokenHolder {
    env.storage()
        .persistent()
        .get(&DataKey::VirtualHolder(holder.clone()))
        .unwrap_or_default()
}

pub fn write_virtual_holder(env: &Env, holder: &Address, record: &VirtualTokenHolder) {
    let key = DataKey::VirtualHolder(holder.clone());
    env.storage().persistent().set(&key, record);
    bump_persistent(env, &key);
}
