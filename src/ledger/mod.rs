use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::oracle::{get_conversion_rate, precision, OracleError, PriceFeed};

/// Minimum contribution in USD, 18 decimals.
pub fn minimum_usd() -> U256 {
    U256::from(50u64) * precision()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("you need to spend more ETH: {usd_value} USD-wei is below the minimum {minimum}")]
    InsufficientFunding { usd_value: U256, minimum: U256 },
    #[error("caller {caller} is not the owner")]
    NotOwner { caller: Address },
    #[error("transfer failed: {0}")]
    TransferFailed(#[from] TransferError),
    #[error("funder index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("price feed: {0}")]
    Oracle(#[from] OracleError),
    #[error("amount overflow")]
    Overflow,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("recipient {to} rejected {amount} wei")]
    Rejected { to: Address, amount: U256 },
    #[error("recipient {to} balance would overflow")]
    Overflow { to: Address },
}

/// Moves native value out of the ledger. Implemented by whatever holds account balances.
pub trait NativeTransfer {
    fn send_value(&mut self, to: Address, amount: U256) -> Result<(), TransferError>;
}

/// Sender and attached value of a payable call.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallContext {
    pub sender: Address,
    pub value: U256,
}

impl CallContext {
    pub fn new(sender: Address, value: U256) -> Self {
        Self { sender, value }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawVariant {
    Canonical,
    Cheaper,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Funded {
        funder: Address,
        amount: U256,
    },
    Withdrawn {
        to: Address,
        amount: U256,
        funders_cleared: usize,
        variant: WithdrawVariant,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub owner: Address,
    pub price_feed: Address,
    pub balance: U256,
    pub amounts: BTreeMap<Address, U256>,
    pub funders: Vec<Address>,
    pub state_root: [u8; 32],
}

/// Bookkeeping of the FundMe contract: who sent how much, and who may take it out.
#[derive(Clone, Debug)]
pub struct FundingLedger {
    owner: Address,
    price_feed: Address,
    balance: U256,
    address_to_amount_funded: BTreeMap<Address, U256>,
    funders: Vec<Address>,
    events: Vec<LedgerEvent>,
}

impl FundingLedger {
    pub fn new(owner: Address, price_feed: Address) -> Self {
        Self {
            owner,
            price_feed,
            balance: U256::ZERO,
            address_to_amount_funded: BTreeMap::new(),
            funders: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Accepts `ctx.value` from `ctx.sender` if it is worth at least the USD minimum.
    pub fn fund(&mut self, ctx: &CallContext, feed: &dyn PriceFeed) -> Result<(), LedgerError> {
        let usd_value = get_conversion_rate(ctx.value, feed)?;
        let minimum = minimum_usd();
        if usd_value < minimum {
            return Err(LedgerError::InsufficientFunding { usd_value, minimum });
        }

        let funded = self.address_to_amount_funded(ctx.sender);
        let funded = funded.checked_add(ctx.value).ok_or(LedgerError::Overflow)?;
        let balance = self
            .balance
            .checked_add(ctx.value)
            .ok_or(LedgerError::Overflow)?;

        self.address_to_amount_funded.insert(ctx.sender, funded);
        self.funders.push(ctx.sender);
        self.balance = balance;
        self.events.push(LedgerEvent::Funded {
            funder: ctx.sender,
            amount: ctx.value,
        });
        Ok(())
    }

    /// Plain value transfer with no calldata.
    pub fn receive(&mut self, ctx: &CallContext, feed: &dyn PriceFeed) -> Result<(), LedgerError> {
        self.fund(ctx, feed)
    }

    /// Call with calldata matching no entry point.
    pub fn fallback(
        &mut self,
        ctx: &CallContext,
        _data: &[u8],
        feed: &dyn PriceFeed,
    ) -> Result<(), LedgerError> {
        self.fund(ctx, feed)
    }

    pub fn withdraw(
        &mut self,
        caller: Address,
        transfer: &mut dyn NativeTransfer,
    ) -> Result<(), LedgerError> {
        self.only_owner(caller)?;
        let amount = self.balance;
        transfer.send_value(self.owner, amount)?;
        self.balance = U256::ZERO;

        let cleared = self.funders.len();
        let mut index = 0;
        while index < self.funders.len() {
            let funder = self.funders[index];
            self.address_to_amount_funded.insert(funder, U256::ZERO);
            index += 1;
        }
        while self.funders.pop().is_some() {}

        self.record_withdrawal(amount, cleared, WithdrawVariant::Canonical);
        Ok(())
    }

    /// Same outcome as [`FundingLedger::withdraw`]; the funder list is read once and
    /// replaced in a single swap.
    pub fn cheaper_withdraw(
        &mut self,
        caller: Address,
        transfer: &mut dyn NativeTransfer,
    ) -> Result<(), LedgerError> {
        self.only_owner(caller)?;
        let amount = self.balance;
        transfer.send_value(self.owner, amount)?;
        self.balance = U256::ZERO;

        let funders = std::mem::take(&mut self.funders);
        for funder in &funders {
            self.address_to_amount_funded.insert(*funder, U256::ZERO);
        }

        self.record_withdrawal(amount, funders.len(), WithdrawVariant::Cheaper);
        Ok(())
    }

    fn only_owner(&self, caller: Address) -> Result<(), LedgerError> {
        if caller != self.owner {
            return Err(LedgerError::NotOwner { caller });
        }
        Ok(())
    }

    fn record_withdrawal(
        &mut self,
        amount: U256,
        funders_cleared: usize,
        variant: WithdrawVariant,
    ) {
        self.events.push(LedgerEvent::Withdrawn {
            to: self.owner,
            amount,
            funders_cleared,
            variant,
        });
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn price_feed(&self) -> Address {
        self.price_feed
    }

    pub fn funder(&self, index: usize) -> Result<Address, LedgerError> {
        self.funders
            .get(index)
            .copied()
            .ok_or(LedgerError::IndexOutOfRange {
                index,
                len: self.funders.len(),
            })
    }

    pub fn funders_len(&self) -> usize {
        self.funders.len()
    }

    pub fn address_to_amount_funded(&self, funder: Address) -> U256 {
        self.address_to_amount_funded
            .get(&funder)
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn balance(&self) -> U256 {
        self.balance
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            owner: self.owner,
            price_feed: self.price_feed,
            balance: self.balance,
            amounts: self.address_to_amount_funded.clone(),
            funders: self.funders.clone(),
            state_root: compute_state_root(
                self.owner,
                self.balance,
                &self.address_to_amount_funded,
                &self.funders,
            ),
        }
    }
}

fn compute_state_root(
    owner: Address,
    balance: U256,
    amounts: &BTreeMap<Address, U256>,
    funders: &[Address],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"owner");
    hasher.update(owner.as_slice());
    hasher.update(b"balance");
    hasher.update(balance.to_be_bytes::<32>());
    for (funder, amount) in amounts {
        hasher.update(b"amount");
        hasher.update(funder.as_slice());
        hasher.update(amount.to_be_bytes::<32>());
    }
    hasher.update(b"funders");
    hasher.update((funders.len() as u64).to_le_bytes());
    for funder in funders {
        hasher.update(funder.as_slice());
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    use alloy_primitives::utils::parse_ether;

    use crate::oracle::MockV3Aggregator;

    struct Wallets(BTreeMap<Address, U256>);

    impl NativeTransfer for Wallets {
        fn send_value(&mut self, to: Address, amount: U256) -> Result<(), TransferError> {
            *self.0.entry(to).or_default() += amount;
            Ok(())
        }
    }

    struct Rejecting;

    impl NativeTransfer for Rejecting {
        fn send_value(&mut self, to: Address, amount: U256) -> Result<(), TransferError> {
            Err(TransferError::Rejected { to, amount })
        }
    }

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn funded_ledger(funders: &[u8]) -> (FundingLedger, MockV3Aggregator) {
        let feed = MockV3Aggregator::new(8, 2000_00000000);
        let mut ledger = FundingLedger::new(addr(0xaa), addr(0xfe));
        for byte in funders {
            ledger
                .fund(&CallContext::new(addr(*byte), parse_ether("1").unwrap()), &feed)
                .unwrap();
        }
        (ledger, feed)
    }

    #[test]
    fn funding_records_amount_and_funder() {
        let (ledger, _) = funded_ledger(&[1]);
        assert_eq!(ledger.address_to_amount_funded(addr(1)), parse_ether("1").unwrap());
        assert_eq!(ledger.funder(0).unwrap(), addr(1));
        assert_eq!(ledger.balance(), parse_ether("1").unwrap());
        assert_eq!(ledger.events().len(), 1);
    }

    #[test]
    fn repeated_funding_keeps_duplicates_in_funder_list() {
        let (ledger, _) = funded_ledger(&[1, 2, 1]);
        assert_eq!(ledger.funders_len(), 3);
        assert_eq!(ledger.funder(2).unwrap(), addr(1));
        assert_eq!(ledger.address_to_amount_funded(addr(1)), parse_ether("2").unwrap());
    }

    #[test]
    fn oversized_contribution_fails_instead_of_wrapping() {
        let (mut ledger, feed) = funded_ledger(&[1]);
        let before = ledger.snapshot();
        // $2000 with 18 decimals
        let price = U256::from(2000u64) * precision();
        let amount = U256::MAX / price + U256::from(1u64);
        assert_eq!(
            ledger.fund(&CallContext::new(addr(2), amount), &feed),
            Err(LedgerError::Oracle(OracleError::Overflow))
        );
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn funding_below_minimum_changes_nothing() {
        let (mut ledger, feed) = funded_ledger(&[1]);
        let before = ledger.snapshot();
        // 0.02 ETH at $2000 is $40
        let err = ledger
            .fund(&CallContext::new(addr(2), parse_ether("0.02").unwrap()), &feed)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunding { .. }));
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn exactly_the_minimum_is_accepted() {
        let (mut ledger, feed) = funded_ledger(&[]);
        ledger
            .fund(&CallContext::new(addr(3), parse_ether("0.025").unwrap()), &feed)
            .unwrap();
        assert_eq!(ledger.funders_len(), 1);
    }

    #[test]
    fn receive_and_fallback_route_through_fund() {
        let (mut ledger, feed) = funded_ledger(&[]);
        let value = parse_ether("1").unwrap();
        ledger.receive(&CallContext::new(addr(4), value), &feed).unwrap();
        ledger
            .fallback(&CallContext::new(addr(5), value), &[0xde, 0xad], &feed)
            .unwrap();
        assert_eq!(ledger.funders_len(), 2);
        assert_eq!(ledger.balance(), value * U256::from(2u64));

        let err = ledger
            .receive(&CallContext::new(addr(6), U256::ZERO), &feed)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunding { .. }));
    }

    #[test]
    fn withdraw_pays_owner_and_resets_bookkeeping() {
        let (mut ledger, _) = funded_ledger(&[1, 2, 3]);
        let mut wallets = Wallets(BTreeMap::new());
        ledger.withdraw(addr(0xaa), &mut wallets).unwrap();
        assert_eq!(wallets.0[&addr(0xaa)], parse_ether("3").unwrap());
        assert_eq!(ledger.balance(), U256::ZERO);
        assert_eq!(ledger.funders_len(), 0);
        for byte in [1, 2, 3] {
            assert_eq!(ledger.address_to_amount_funded(addr(byte)), U256::ZERO);
        }
        assert!(matches!(
            ledger.funder(0),
            Err(LedgerError::IndexOutOfRange { index: 0, len: 0 })
        ));
    }

    #[test]
    fn both_withdrawals_end_in_the_same_state() {
        let (mut canonical, _) = funded_ledger(&[1, 2, 2, 3]);
        let mut cheaper = canonical.clone();

        canonical
            .withdraw(addr(0xaa), &mut Wallets(BTreeMap::new()))
            .unwrap();
        cheaper
            .cheaper_withdraw(addr(0xaa), &mut Wallets(BTreeMap::new()))
            .unwrap();

        assert_eq!(canonical.snapshot(), cheaper.snapshot());
    }

    #[test]
    fn non_owner_cannot_withdraw() {
        let (mut ledger, _) = funded_ledger(&[1]);
        let before = ledger.snapshot();
        let mut wallets = Wallets(BTreeMap::new());
        assert_eq!(
            ledger.withdraw(addr(1), &mut wallets).unwrap_err(),
            LedgerError::NotOwner { caller: addr(1) }
        );
        assert_eq!(
            ledger.cheaper_withdraw(addr(1), &mut wallets).unwrap_err(),
            LedgerError::NotOwner { caller: addr(1) }
        );
        assert_eq!(ledger.snapshot(), before);
        assert!(wallets.0.is_empty());
    }

    #[test]
    fn failed_transfer_rolls_back_both_variants() {
        let (mut ledger, _) = funded_ledger(&[1, 2]);
        let before = ledger.snapshot();
        assert!(matches!(
            ledger.withdraw(addr(0xaa), &mut Rejecting),
            Err(LedgerError::TransferFailed(_))
        ));
        assert!(matches!(
            ledger.cheaper_withdraw(addr(0xaa), &mut Rejecting),
            Err(LedgerError::TransferFailed(_))
        ));
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn state_root_is_deterministic() {
        let (ledger, _) = funded_ledger(&[1, 2]);
        assert_eq!(ledger.snapshot().state_root, ledger.snapshot().state_root);
        let (other, _) = funded_ledger(&[2, 1]);
        assert_ne!(ledger.snapshot().state_root, other.snapshot().state_root);
    }
}
