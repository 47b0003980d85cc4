use soroban_sdk::contracterror;

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    ContractDeleted = 3,
    OwnerOnly = 4,
    InvalidAuctionParams = 5,
    InvalidAmount = 6,
    InvalidAuctionId = 7,
    ArithmeticOverflow = 8,

    // Auction phase
    NotInBiddingPhase = 10,
    AuctionNotFinalised = 11,
    EndCurrentAuction = 12,
    NotOpenForFinalisation = 13,
    NoAuctionToAbort = 14,
    BiddingNotClosed = 15,
    BidderNotFinalised = 16,
    SlotsNotFinal = 17,

    // Pricing
    BidBelowCurrentPrice = 20,
    SuggestedSolutionBelowCurrentPrice = 21,
    FinalPriceDoesNotClear = 22,
    ClearingDidNotConverge = 23,

    // Stakers, pools and pledges
    SenderAlreadyBid = 30,
    AlreadyPledged = 31,
    CannotChangePool = 32,
    NoPledgeInThisAuction = 33,
    RewardsDepleted = 34,
    NotARegisteredPool = 35,
    PoolAlreadyRegistered = 36,
    UnclaimedPoolRewards = 37,
    PoolAlreadyBid = 38,
    PoolMustBidPledges = 39,

    LockupNotOver = 40,
    EarliestDeleteNotReached = 41,

    NotAllowedForVirtualTokenHolders = 50,
    VirtualTokensAboveLimit = 51,
    DepositNotEmpty = 52,
}
