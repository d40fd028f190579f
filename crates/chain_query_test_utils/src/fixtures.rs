use chain_query_key::{Address, CallDescriptor, ChainId, U256};

/// The chain of all fixture descriptors.
pub const CHAIN_ID: ChainId = 1;

/// The address of the token contract.
pub fn token() -> Address {
    Address::repeat_byte(0x42)
}

/// The address of the `index`-th account.
pub fn account(index: u8) -> Address {
    Address::repeat_byte(index)
}

/// `balanceOf(account(owner))` on the token contract.
pub fn balance_of(owner: u8) -> CallDescriptor {
    CallDescriptor::new(
        token(),
        "balanceOf(address)",
        vec![account(owner).into()],
        CHAIN_ID,
    )
    .expect("valid descriptor")
}

/// `totalSupply()` on the token contract.
pub fn total_supply() -> CallDescriptor {
    CallDescriptor::new(token(), "totalSupply()", Vec::new(), CHAIN_ID)
        .expect("valid descriptor")
}

/// `transfer(account(to), amount)` on the token contract.
pub fn transfer(to: u8, amount: u64) -> CallDescriptor {
    CallDescriptor::new(
        token(),
        "transfer(address,uint256)",
        vec![account(to).into(), U256::from(amount).into()],
        CHAIN_ID,
    )
    .expect("valid descriptor")
}
