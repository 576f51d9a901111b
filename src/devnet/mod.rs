//! In-memory network used for development deployments and for rehearsing public ones.
//!
//! Transactions execute one at a time against `&mut DevChain`. A transaction either
//! commits every effect (balances, contract state, nonce, a new block) or fails and
//! leaves the chain exactly as it was.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    account::{AccountError, Call, NamedAccounts, SignedTransaction, Signer, TransactionRequest},
    chain::{ChainConfig, Network},
    deploy::{
        encode_args, ConstructorArg, ContractKind, DeployBackend, DeployError, DeployRequest,
        DeployedContract,
    },
    ledger::{CallContext, FundingLedger, LedgerError, LedgerEvent, NativeTransfer, TransferError},
    oracle::{precision, MockV3Aggregator},
    verify::{creation_code_hash, CodeSource},
};

/// Accounts a development network hands out, deployer included.
pub const DEV_ACCOUNT_COUNT: u32 = 20;
pub const BLOCK_TIME_SECS: u64 = 12;

/// Balance every development account starts with.
pub fn dev_account_balance() -> U256 {
    U256::from(10_000u64) * precision()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DevnetError {
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error("nonce mismatch for {account}: expected {expected}, got {got}")]
    NonceMismatch {
        account: Address,
        expected: u64,
        got: u64,
    },
    #[error("{account} holds {balance} wei, {required} required")]
    InsufficientBalance {
        account: Address,
        balance: U256,
        required: U256,
    },
    #[error("unknown account {0}")]
    UnknownAccount(Address),
    #[error("no contract at {0}")]
    UnknownContract(Address),
    #[error("contract at {to} has no entry point for {call}")]
    UnsupportedCall { to: Address, call: String },
    #[error("{to} is not payable")]
    NonPayable { to: Address },
    #[error("execution reverted: {0}")]
    Reverted(#[from] LedgerError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("bad constructor arguments for {0}")]
    BadConstructorArgs(&'static str),
}

/// Native balances of every account the chain knows.
#[derive(Clone, Debug, Default)]
pub struct Bank {
    balances: BTreeMap<Address, U256>,
    non_payable: BTreeSet<Address>,
}

impl Bank {
    pub fn balance_of(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or(U256::ZERO)
    }

    fn set_balance(&mut self, account: Address, amount: U256) {
        self.balances.insert(account, amount);
    }

    fn ensure_covers(&self, account: Address, required: U256) -> Result<U256, DevnetError> {
        let balance = self.balance_of(account);
        if balance < required {
            return Err(DevnetError::InsufficientBalance {
                account,
                balance,
                required,
            });
        }
        Ok(balance - required)
    }
}

impl NativeTransfer for Bank {
    fn send_value(&mut self, to: Address, amount: U256) -> Result<(), TransferError> {
        if self.non_payable.contains(&to) {
            return Err(TransferError::Rejected { to, amount });
        }
        let balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(TransferError::Overflow { to })?;
        self.balances.insert(to, balance);
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<LedgerEvent>,
}

#[derive(Debug)]
pub struct DevChain {
    network: Network,
    block_number: u64,
    timestamp: u64,
    bank: Bank,
    nonces: BTreeMap<Address, u64>,
    feeds: BTreeMap<Address, MockV3Aggregator>,
    ledgers: BTreeMap<Address, FundingLedger>,
    code: BTreeMap<Address, B256>,
    receipts: Vec<Receipt>,
}

impl DevChain {
    /// Empty chain reporting `network`, with `accounts` funded with `balance` each.
    pub fn new(network: Network, accounts: &NamedAccounts, balance: U256) -> Self {
        let mut bank = Bank::default();
        for signer in accounts.signers() {
            bank.set_balance(signer.address(), balance);
        }
        Self {
            network,
            block_number: 0,
            timestamp: 0,
            bank,
            nonces: BTreeMap::new(),
            feeds: BTreeMap::new(),
            ledgers: BTreeMap::new(),
            code: BTreeMap::new(),
            receipts: Vec::new(),
        }
    }

    /// A local development network with the standard funded accounts.
    pub fn development(name: &str, mnemonic: &str) -> (Self, NamedAccounts) {
        let accounts = NamedAccounts::from_mnemonic(mnemonic, DEV_ACCOUNT_COUNT);
        let network = Network::new(name, crate::chain::HARDHAT_CHAIN_ID);
        let chain = Self::new(network, &accounts, dev_account_balance());
        (chain, accounts)
    }

    /// Rehearsal of a configured public network: the real feed address answers with
    /// the mock parameters, the way it would on a local fork.
    pub fn fork(
        network: Network,
        config: &ChainConfig,
        accounts: &NamedAccounts,
    ) -> Result<Self, DeployError> {
        let entry = config.entry(network.chain_id)?;
        let feed_address = entry.eth_usd_price_feed;
        let mut chain = Self::new(network, accounts, dev_account_balance());
        chain.install_feed(
            feed_address,
            MockV3Aggregator::new(config.mock.decimals, config.mock.initial_answer),
        );
        Ok(chain)
    }

    /// Starts the chain `network_name` refers to in `config`.
    pub fn launch(
        network_name: &str,
        config: &ChainConfig,
        mnemonic: &str,
    ) -> Result<(Self, NamedAccounts), DeployError> {
        let network = config.network_by_name(network_name)?;
        Self::for_network(network, config, mnemonic)
    }

    /// Development chain if `network` is one, otherwise a fork of the configured chain.
    pub fn for_network(
        network: Network,
        config: &ChainConfig,
        mnemonic: &str,
    ) -> Result<(Self, NamedAccounts), DeployError> {
        let accounts = NamedAccounts::from_mnemonic(mnemonic, DEV_ACCOUNT_COUNT);
        if config.is_development(&network) {
            let chain = Self::new(network, &accounts, dev_account_balance());
            return Ok((chain, accounts));
        }
        let chain = Self::fork(network, config, &accounts)?;
        Ok((chain, accounts))
    }

    /// Places an aggregator at a fixed address without a deployment.
    pub fn install_feed(&mut self, address: Address, feed: MockV3Aggregator) {
        self.bank.non_payable.insert(address);
        self.feeds.insert(address, feed);
    }

    /// Overwrites the native balance of `account`, creating it if needed.
    pub fn set_balance(&mut self, account: Address, amount: U256) {
        self.bank.set_balance(account, amount);
    }

    /// Makes plain value transfers to `account` fail.
    pub fn reject_value_to(&mut self, account: Address) {
        self.bank.non_payable.insert(account);
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn nonce(&self, account: Address) -> u64 {
        self.nonces.get(&account).copied().unwrap_or(0)
    }

    /// Native balance; for a FundMe contract this is what its ledger holds.
    pub fn balance_of(&self, account: Address) -> U256 {
        match self.ledgers.get(&account) {
            Some(ledger) => ledger.balance(),
            None => self.bank.balance_of(account),
        }
    }

    pub fn fund_me(&self, address: Address) -> Result<&FundingLedger, DevnetError> {
        self.ledgers
            .get(&address)
            .ok_or(DevnetError::UnknownContract(address))
    }

    pub fn aggregator(&self, address: Address) -> Result<&MockV3Aggregator, DevnetError> {
        self.feeds
            .get(&address)
            .ok_or(DevnetError::UnknownContract(address))
    }

    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    pub fn mine(&mut self, blocks: u64) {
        self.block_number += blocks;
        self.timestamp += blocks * BLOCK_TIME_SECS;
    }

    /// Builds, signs and sends a transaction from `signer` with its next nonce.
    pub fn transact(
        &mut self,
        signer: &Signer,
        to: Address,
        value: U256,
        call: Call,
    ) -> Result<Receipt, DevnetError> {
        let tx = TransactionRequest {
            from: signer.address(),
            to,
            value,
            nonce: self.nonce(signer.address()),
            call,
        };
        self.send_transaction(&signer.sign(tx))
    }

    pub fn send_transaction(&mut self, signed: &SignedTransaction) -> Result<Receipt, DevnetError> {
        let sender = signed.recover_sender()?;
        let tx = &signed.tx;
        let expected = self.nonce(sender);
        if tx.nonce != expected {
            return Err(DevnetError::NonceMismatch {
                account: sender,
                expected,
                got: tx.nonce,
            });
        }
        let tx_hash = signed.hash();
        let events = match self.execute(sender, tx) {
            Ok(events) => events,
            Err(err) => {
                warn!(%tx_hash, from = %sender, to = %tx.to, "transaction reverted: {err}");
                return Err(err);
            }
        };

        self.nonces.insert(sender, expected + 1);
        self.mine(1);
        let receipt = Receipt {
            tx_hash,
            block_number: self.block_number,
            from: sender,
            to: tx.to,
            value: tx.value,
            events,
        };
        debug!(%tx_hash, block = self.block_number, "transaction mined");
        self.receipts.push(receipt.clone());
        Ok(receipt)
    }

    /// Applies `tx`; on error nothing has been written.
    fn execute(
        &mut self,
        sender: Address,
        tx: &TransactionRequest,
    ) -> Result<Vec<LedgerEvent>, DevnetError> {
        let remaining = self.bank.ensure_covers(sender, tx.value)?;
        let ctx = CallContext::new(sender, tx.value);

        if let Some(ledger) = self.ledgers.get_mut(&tx.to) {
            let seen = ledger.events().len();
            match &tx.call {
                Call::Fund | Call::Receive | Call::Fallback { .. } => {
                    let feed = self
                        .feeds
                        .get(&ledger.price_feed())
                        .ok_or(DevnetError::UnknownContract(ledger.price_feed()))?;
                    match &tx.call {
                        Call::Receive => ledger.receive(&ctx, feed)?,
                        Call::Fallback { data } => ledger.fallback(&ctx, data, feed)?,
                        _ => ledger.fund(&ctx, feed)?,
                    }
                    self.bank.balances.insert(sender, remaining);
                }
                Call::Withdraw | Call::CheaperWithdraw => {
                    if !tx.value.is_zero() {
                        return Err(DevnetError::NonPayable { to: tx.to });
                    }
                    if tx.call == Call::Withdraw {
                        ledger.withdraw(sender, &mut self.bank)?;
                    } else {
                        ledger.cheaper_withdraw(sender, &mut self.bank)?;
                    }
                }
                other => {
                    return Err(DevnetError::UnsupportedCall {
                        to: tx.to,
                        call: format!("{other:?}"),
                    })
                }
            }
            return Ok(ledger.events()[seen..].to_vec());
        }

        if let Some(feed) = self.feeds.get_mut(&tx.to) {
            return match tx.call {
                Call::UpdateAnswer { answer } if tx.value.is_zero() => {
                    feed.update_answer(answer, self.timestamp + BLOCK_TIME_SECS);
                    Ok(Vec::new())
                }
                Call::UpdateAnswer { .. } => Err(DevnetError::NonPayable { to: tx.to }),
                ref other => Err(DevnetError::UnsupportedCall {
                    to: tx.to,
                    call: format!("{other:?}"),
                }),
            };
        }

        // Plain transfer between externally owned accounts.
        match tx.call {
            Call::Receive => {
                self.bank.send_value(tx.to, tx.value)?;
                let sender_balance = if tx.to == sender {
                    self.bank.balance_of(sender) - tx.value
                } else {
                    remaining
                };
                self.bank.balances.insert(sender, sender_balance);
                Ok(Vec::new())
            }
            _ => Err(DevnetError::UnknownContract(tx.to)),
        }
    }

    fn instantiate(
        &mut self,
        address: Address,
        deployer: Address,
        contract: ContractKind,
        args: &[ConstructorArg],
    ) -> Result<(), DevnetError> {
        match (contract, args) {
            (
                ContractKind::MockV3Aggregator,
                [ConstructorArg::Uint(decimals), ConstructorArg::Int(answer)],
            ) => {
                let decimals = u8::try_from(*decimals)
                    .map_err(|_| DevnetError::BadConstructorArgs(contract.name()))?;
                self.install_feed(address, MockV3Aggregator::new(decimals, *answer));
            }
            (ContractKind::FundMe, [ConstructorArg::Address(price_feed)]) => {
                self.ledgers
                    .insert(address, FundingLedger::new(deployer, *price_feed));
            }
            _ => return Err(DevnetError::BadConstructorArgs(contract.name())),
        }
        Ok(())
    }
}

impl CodeSource for DevChain {
    fn creation_code_hash(&self, address: Address) -> Option<B256> {
        self.code.get(&address).copied()
    }
}

impl DeployBackend for DevChain {
    fn network(&self) -> Network {
        self.network.clone()
    }

    fn deploy(&mut self, request: DeployRequest) -> Result<DeployedContract, DeployError> {
        let backend_error = |err: DevnetError| DeployError::Backend {
            contract: request.contract.name().to_string(),
            source: Box::new(err),
        };
        if !self.bank.balances.contains_key(&request.from) {
            return Err(backend_error(DevnetError::UnknownAccount(request.from)));
        }
        let nonce = self.nonce(request.from);
        let address = request.from.create(nonce);
        self.instantiate(address, request.from, request.contract, &request.args)
            .map_err(backend_error)?;

        let encoded = encode_args(&request.args);
        self.code
            .insert(address, creation_code_hash(request.contract, &encoded));
        self.nonces.insert(request.from, nonce + 1);

        let mut preimage = Vec::with_capacity(28 + encoded.len());
        preimage.extend_from_slice(request.from.as_slice());
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&encoded);
        let tx_hash = keccak256(&preimage);

        self.mine(1);
        let block_number = self.block_number;
        // the inclusion block counts as the first confirmation
        self.mine(request.wait_confirmations.saturating_sub(1));
        debug!(
            contract = request.contract.name(),
            %address,
            block = block_number,
            confirmations = request.wait_confirmations,
            "deployed"
        );

        Ok(DeployedContract {
            contract: request.contract,
            address,
            args: request.args,
            tx_hash,
            block_number,
            verification: None,
        })
    }

    fn code(&self) -> &dyn CodeSource {
        self
    }
}
