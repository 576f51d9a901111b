use std::collections::BTreeMap;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// Precision every USD value in the crate is expressed in.
pub const USD_DECIMALS: u8 = 18;

/// 10^18, the wei-per-ether scale.
pub fn precision() -> U256 {
    pow10(USD_DECIMALS)
}

fn pow10(exp: u8) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("price feed answered a non-positive price {answer}")]
    InvalidAnswer { answer: i128 },
    #[error("round {round_id} was answered in stale round {answered_in_round}")]
    StaleRound {
        round_id: u64,
        answered_in_round: u64,
    },
    #[error("no data present for round {round_id}")]
    UnknownRound { round_id: u64 },
    #[error("price feed reports {decimals} decimals, more than {max} supported")]
    UnsupportedDecimals { decimals: u8, max: u8 },
    #[error("USD value overflows 256 bits")]
    Overflow,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RoundData {
    pub round_id: u64,
    pub answer: i128,
    pub started_at: u64,
    pub updated_at: u64,
    pub answered_in_round: u64,
}

/// Read side of an aggregator: the part of the oracle the ledger depends on.
pub trait PriceFeed {
    fn decimals(&self) -> u8;
    fn description(&self) -> &str;
    fn version(&self) -> u64;
    fn latest_round_data(&self) -> Result<RoundData, OracleError>;
}

/// Latest price of one native unit in USD, scaled to 18 decimals.
pub fn get_price(feed: &dyn PriceFeed) -> Result<U256, OracleError> {
    let round = feed.latest_round_data()?;
    if round.answered_in_round < round.round_id {
        return Err(OracleError::StaleRound {
            round_id: round.round_id,
            answered_in_round: round.answered_in_round,
        });
    }
    if round.answer <= 0 {
        return Err(OracleError::InvalidAnswer {
            answer: round.answer,
        });
    }
    let decimals = feed.decimals();
    if decimals > USD_DECIMALS {
        return Err(OracleError::UnsupportedDecimals {
            decimals,
            max: USD_DECIMALS,
        });
    }
    let answer = U256::from(round.answer.unsigned_abs());
    answer
        .checked_mul(pow10(USD_DECIMALS - decimals))
        .ok_or(OracleError::Overflow)
}

/// USD value (18 decimals) of `amount` wei.
pub fn get_conversion_rate(amount: U256, feed: &dyn PriceFeed) -> Result<U256, OracleError> {
    let price = get_price(feed)?;
    let scaled = price.checked_mul(amount).ok_or(OracleError::Overflow)?;
    Ok(scaled / precision())
}

/// Stand-in aggregator deployed on development networks.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MockV3Aggregator {
    decimals: u8,
    latest_answer: i128,
    latest_timestamp: u64,
    latest_round: u64,
    rounds: BTreeMap<u64, RoundData>,
}

impl MockV3Aggregator {
    pub const VERSION: u64 = 0;
    pub const DESCRIPTION: &'static str = "v0.6/tests/MockV3Aggregator.sol";

    pub fn new(decimals: u8, initial_answer: i128) -> Self {
        let mut mock = Self {
            decimals,
            latest_answer: 0,
            latest_timestamp: 0,
            latest_round: 0,
            rounds: BTreeMap::new(),
        };
        mock.update_answer(initial_answer, 0);
        mock
    }

    /// Publishes a new answer as the next round.
    pub fn update_answer(&mut self, answer: i128, timestamp: u64) {
        self.latest_round += 1;
        self.latest_answer = answer;
        self.latest_timestamp = timestamp;
        self.rounds.insert(
            self.latest_round,
            RoundData {
                round_id: self.latest_round,
                answer,
                started_at: timestamp,
                updated_at: timestamp,
                answered_in_round: self.latest_round,
            },
        );
    }

    /// Overwrites the latest round with arbitrary data, stale rounds included.
    pub fn update_round_data(&mut self, round: RoundData) {
        self.latest_round = round.round_id;
        self.latest_answer = round.answer;
        self.latest_timestamp = round.updated_at;
        self.rounds.insert(round.round_id, round);
    }

    pub fn get_round_data(&self, round_id: u64) -> Result<RoundData, OracleError> {
        self.rounds
            .get(&round_id)
            .copied()
            .ok_or(OracleError::UnknownRound { round_id })
    }

    pub fn latest_answer(&self) -> i128 {
        self.latest_answer
    }

    pub fn latest_round(&self) -> u64 {
        self.latest_round
    }

    pub fn latest_timestamp(&self) -> u64 {
        self.latest_timestamp
    }
}

impl PriceFeed for MockV3Aggregator {
    fn decimals(&self) -> u8 {
        self.decimals
    }

    fn description(&self) -> &str {
        Self::DESCRIPTION
    }

    fn version(&self) -> u64 {
        Self::VERSION
    }

    fn latest_round_data(&self) -> Result<RoundData, OracleError> {
        self.get_round_data(self.latest_round)
    }
}
