use soroban_sdk::{Address, Env};

use crate::storage::Auction;

pub fn new_auction(env: &Env, auction: &Auction) {
    env.events()
        .publish(("new_auction", auction.aid), auction.clone());
}

pub fn bid(env: &Env, aid: u64, staker: &Address, amount: i128, current_price: i128) {
    env.events()
        .publish(("bid", aid), (staker.clone(), amount, current_price));
}

pub fn new_pool(env: &Env, aid: u64, pool: &Address, total_reward: i128, reward_per_tok: i128) {
    env.events()
        .publish(("new_pool", aid), (pool.clone(), total_reward, reward_per_tok));
}

pub fn new_pledge(env: &Env, aid: u64, pledger: &Address, pool: &Address, amount: i128) {
    env.events()
        .publish(("new_pledge", aid), (pledger.clone(), pool.clone(), amount));
}

pub fn auction_finalised(env: &Env, aid: u64, final_price: i128, slots_sold: u32) {
    env.events()
        .publish(("auction_finalised", aid), (final_price, slots_sold));
}

pub fn lockup_ended(env: &Env, aid: u64, rewards_paid: i128) {
    env.events().publish(("lockup_ended", aid), rewards_paid);
}

pub fn auction_aborted(env: &Env, aid: u64, rewards_paid: bool) {
    env.events().publish(("auction_aborted", aid), rewards_paid);
}
