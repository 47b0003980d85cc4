use soroban_sdk::{contractclient, Address, Env};

/// Staking ledger functions used by a pool operator.
#[allow(dead_code)]
#[contractclient(name = "Client")]
pub trait DutchStaking {
    fn register_pool(
        env: Env,
        pool: Address,
        aid: u64,
        max_stake: i128,
        total_reward: i128,
        reward_per_tok: i128,
    );

    fn bid_pledged_stake(env: Env, pool: Address) -> i128;

    fn bid_pledged_and_self_stake(env: Env, pool: Address, extra: i128) -> i128;

    fn retrieve_unclaimed_pool_rewards(env: Env, pool: Address) -> i128;

    fn withdraw_self_stake(env: Env, staker: Address) -> i128;
}
