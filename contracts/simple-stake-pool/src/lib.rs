#![no_std]
use soroban_sdk::{
    contract, contractclient, contracterror, contractimpl, contracttype, log, token, Address, Env,
};

mod staking;

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    BalanceBelowMinimum = 3,
    InvalidAmount = 4,
}

#[derive(Clone)]
#[contracttype]
enum DataKey {
    Owner,
    Token,
    Staking,
}

/// What a pool operator does on the staking ledger: register for an
/// auction, bid with the collected pledges and manage its own stake.
#[contractclient(name = "StakingPoolClient")]
pub trait StakingPool {
    fn register_pool(
        env: Env,
        aid: u64,
        max_stake: i128,
        total_reward: i128,
        reward_per_tok: i128,
    ) -> Result<(), Error>;

    fn bid_pledged_stake(env: Env) -> Result<i128, Error>;

    fn bid_pledged_and_self_stake(env: Env, extra: i128) -> Result<i128, Error>;

    fn retrieve_unclaimed_pool_rewards(env: Env) -> Result<i128, Error>;

    fn withdraw_self_stake(env: Env) -> Result<i128, Error>;
}

/// Pool run by a single operator. Pledges and rewards are held by the
/// staking ledger; this contract holds the operator's funds.
#[contract]
pub struct SimpleStakePool;

#[contractimpl]
impl SimpleStakePool {
    pub fn initialize(env: Env, owner: Address, token: Address, staking: Address) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Owner) {
            return Err(Error::AlreadyInitialized);
        }

        env.storage().instance().set(&DataKey::Owner, &owner);
        env.storage().instance().set(&DataKey::Token, &token);
        env.storage().instance().set(&DataKey::Staking, &staking);

        Ok(())
    }

    /// Send the pool's whole balance to the owner.
    /// Fails if the balance is below `min_amount`.
    pub fn retrieve_pool_balance(env: Env, min_amount: i128) -> Result<i128, Error> {
        let owner = Self::authorized_owner(&env)?;
        let token = token::Client::new(&env, &Self::token(&env)?);

        let balance = token.balance(&env.current_contract_address());
        if balance < min_amount {
            return Err(Error::BalanceBelowMinimum);
        }
        if balance > 0 {
            token.transfer(&env.current_contract_address(), &owner, &balance);
        }

        log!(&env, "pool balance retrieved", balance);

        Ok(balance)
    }

    pub fn get_owner(env: Env) -> Result<Address, Error> {
        env.storage()
            .instance()
            .get(&DataKey::Owner)
            .ok_or(Error::NotInitialized)
    }

    pub fn get_staking(env: Env) -> Result<Address, Error> {
        env.storage()
            .instance()
            .get(&DataKey::Staking)
            .ok_or(Error::NotInitialized)
    }
}

#[contractimpl]
impl StakingPool for SimpleStakePool {
    /// Register with `total_reward` taken from the pool's balance.
    fn register_pool(
        env: Env,
        aid: u64,
        max_stake: i128,
        total_reward: i128,
        reward_per_tok: i128,
    ) -> Result<(), Error> {
        Self::authorized_owner(&env)?;
        if total_reward < 0 {
            return Err(Error::InvalidAmount);
        }

        let staking = Self::staking(&env)?;
        Self::approve_staking(&env, &staking, total_reward)?;
        staking.register_pool(
            &env.current_contract_address(),
            &aid,
            &max_stake,
            &total_reward,
            &reward_per_tok,
        );

        log!(&env, "pool registered", aid, total_reward);

        Ok(())
    }

    fn bid_pledged_stake(env: Env) -> Result<i128, Error> {
        Self::authorized_owner(&env)?;

        let amount = Self::staking(&env)?.bid_pledged_stake(&env.current_contract_address());
        Ok(amount)
    }

    /// Bid with the pledges plus `extra` from the pool's balance.
    fn bid_pledged_and_self_stake(env: Env, extra: i128) -> Result<i128, Error> {
        Self::authorized_owner(&env)?;
        if extra < 0 {
            return Err(Error::InvalidAmount);
        }

        let staking = Self::staking(&env)?;
        // The ledger takes at most what tops the bid up to the current price
        let balance = token::Client::new(&env, &Self::token(&env)?)
            .balance(&env.current_contract_address());
        Self::approve_staking(&env, &staking, balance)?;

        let amount = staking.bid_pledged_and_self_stake(&env.current_contract_address(), &extra);
        Ok(amount)
    }

    fn retrieve_unclaimed_pool_rewards(env: Env) -> Result<i128, Error> {
        Self::authorized_owner(&env)?;

        let unclaimed = Self::staking(&env)?
            .retrieve_unclaimed_pool_rewards(&env.current_contract_address());
        Ok(unclaimed)
    }

    /// Pull the unlocked part of the pool's stake back into this contract.
    fn withdraw_self_stake(env: Env) -> Result<i128, Error> {
        Self::authorized_owner(&env)?;

        let amount = Self::staking(&env)?.withdraw_self_stake(&env.current_contract_address());
        Ok(amount)
    }
}

impl SimpleStakePool {
    fn authorized_owner(env: &Env) -> Result<Address, Error> {
        let owner: Address = env
            .storage()
            .instance()
            .get(&DataKey::Owner)
            .ok_or(Error::NotInitialized)?;
        owner.require_auth();
        Ok(owner)
    }

    fn token(env: &Env) -> Result<Address, Error> {
        env.storage()
            .instance()
            .get(&DataKey::Token)
            .ok_or(Error::NotInitialized)
    }

    fn staking(env: &Env) -> Result<staking::Client, Error> {
        let address: Address = env
            .storage()
            .instance()
            .get(&DataKey::Staking)
            .ok_or(Error::NotInitialized)?;
        Ok(staking::Client::new(env, &address))
    }

    /// Allow the staking ledger to pull `amount` within this ledger.
    fn approve_staking(env: &Env, ledger: &staking::Client, amount: i128) -> Result<(), Error> {
        let token = token::Client::new(env, &Self::token(env)?);
        token.approve(
            &env.current_contract_address(),
            &ledger.address,
            &amount,
            &env.ledger().sequence(),
        );
        Ok(())
    }
}
