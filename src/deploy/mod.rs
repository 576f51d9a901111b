use std::collections::BTreeMap;

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, B256, I256, U256};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    chain::{ChainConfig, ChainConfigError, Network},
    verify::{CodeSource, VerificationStatus, Verifier, VerifyRequest},
};

pub const TAG_ALL: &str = "all";
pub const TAG_MOCKS: &str = "mocks";
pub const TAG_FUNDME: &str = "fundme";

const SEPARATOR: &str = "-----------------------------------------------------------------";

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ChainConfigError),
    #[error("no deployment named {0}; run the mocks first")]
    MissingDeployment(String),
    #[error("backend rejected deployment of {contract}: {source}")]
    Backend {
        contract: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContractKind {
    MockV3Aggregator,
    FundMe,
}

impl ContractKind {
    pub fn name(&self) -> &'static str {
        match self {
            ContractKind::MockV3Aggregator => "MockV3Aggregator",
            ContractKind::FundMe => "FundMe",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConstructorArg {
    Address(Address),
    Uint(U256),
    Int(i128),
}

impl ConstructorArg {
    pub fn to_sol_value(&self) -> DynSolValue {
        match self {
            ConstructorArg::Address(address) => DynSolValue::Address(*address),
            ConstructorArg::Uint(value) => DynSolValue::Uint(*value, 256),
            ConstructorArg::Int(value) => {
                let magnitude = I256::from_raw(U256::from(value.unsigned_abs()));
                let value = if *value < 0 {
                    magnitude.wrapping_neg()
                } else {
                    magnitude
                };
                DynSolValue::Int(value, 256)
            }
        }
    }
}

/// ABI encoding of the constructor arguments, as appended to creation code.
pub fn encode_args(args: &[ConstructorArg]) -> Vec<u8> {
    let values = args.iter().map(ConstructorArg::to_sol_value).collect();
    DynSolValue::Tuple(values).abi_encode_params()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployRequest {
    pub contract: ContractKind,
    pub from: Address,
    pub args: Vec<ConstructorArg>,
    pub wait_confirmations: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployedContract {
    pub contract: ContractKind,
    pub address: Address,
    pub args: Vec<ConstructorArg>,
    pub tx_hash: B256,
    pub block_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationStatus>,
}

/// The deploy primitive of a network.
pub trait DeployBackend {
    fn network(&self) -> Network;
    fn deploy(&mut self, request: DeployRequest) -> Result<DeployedContract, DeployError>;
    /// Creation code recorded by the network, for verification.
    fn code(&self) -> &dyn CodeSource;
}

/// Contracts deployed so far, by contract name.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deployments {
    by_name: BTreeMap<String, DeployedContract>,
}

impl Deployments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, contract: ContractKind) -> Result<&DeployedContract, DeployError> {
        self.by_name
            .get(contract.name())
            .ok_or_else(|| DeployError::MissingDeployment(contract.name().to_string()))
    }

    pub fn insert(&mut self, deployed: DeployedContract) {
        self.by_name
            .insert(deployed.contract.name().to_string(), deployed);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeployedContract> {
        self.by_name.values()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Deploys `MockV3Aggregator` on development networks; a no-op elsewhere.
pub fn deploy_mocks(
    backend: &mut dyn DeployBackend,
    deployer: Address,
    config: &ChainConfig,
    deployments: &mut Deployments,
) -> Result<Option<DeployedContract>, DeployError> {
    let network = backend.network();
    if !config.is_development(&network) {
        return Ok(None);
    }
    let deployed = backend.deploy(DeployRequest {
        contract: ContractKind::MockV3Aggregator,
        from: deployer,
        args: vec![
            ConstructorArg::Uint(U256::from(config.mock.decimals)),
            ConstructorArg::Int(config.mock.initial_answer),
        ],
        wait_confirmations: 1,
    })?;
    info!("MockV3Aggregator deployed to: {}", network.name);
    info!("{SEPARATOR}");
    deployments.insert(deployed.clone());
    Ok(Some(deployed))
}

/// Price feed FundMe should be wired to on `network`.
pub fn select_price_feed(
    network: &Network,
    config: &ChainConfig,
    deployments: &Deployments,
) -> Result<Address, DeployError> {
    if config.is_development(network) {
        return Ok(deployments.get(ContractKind::MockV3Aggregator)?.address);
    }
    Ok(config.entry(network.chain_id)?.eth_usd_price_feed)
}

pub fn deploy_fund_me(
    backend: &mut dyn DeployBackend,
    deployer: Address,
    config: &ChainConfig,
    deployments: &mut Deployments,
    verifier: Option<&mut dyn Verifier>,
) -> Result<DeployedContract, DeployError> {
    info!("Deploying FundMe...");
    let network = backend.network();
    let price_feed = select_price_feed(&network, config, deployments)?;
    let development = config.is_development(&network);
    let wait_confirmations = if development {
        1
    } else {
        config.entry(network.chain_id)?.block_confirmations
    };

    let mut deployed = backend.deploy(DeployRequest {
        contract: ContractKind::FundMe,
        from: deployer,
        args: vec![ConstructorArg::Address(price_feed)],
        wait_confirmations,
    })?;

    if let (false, Some(verifier)) = (development, verifier) {
        let request = VerifyRequest {
            address: deployed.address,
            chain_id: network.chain_id,
            contract: ContractKind::FundMe,
            constructor_args: hex::encode(encode_args(&deployed.args)),
        };
        let status = match verifier.verify(&request, backend.code()) {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(address = %deployed.address, "verification failed: {err}");
                VerificationStatus::Failed {
                    reason: err.to_string(),
                }
            }
        };
        deployed.verification = Some(status);
    }

    info!("FundMe deployed to: {}", deployed.address);
    info!("{SEPARATOR}");
    deployments.insert(deployed.clone());
    Ok(deployed)
}

/// Runs every deploy script carrying one of `tags`, mocks first.
pub fn run_deploy_scripts(
    backend: &mut dyn DeployBackend,
    deployer: Address,
    config: &ChainConfig,
    tags: &[&str],
    deployments: &mut Deployments,
    verifier: Option<&mut dyn Verifier>,
) -> Result<(), DeployError> {
    let wants = |script_tags: &[&str]| tags.iter().any(|tag| script_tags.contains(tag));
    if wants(&[TAG_ALL, TAG_MOCKS]) {
        deploy_mocks(backend, deployer, config, deployments)?;
    }
    if wants(&[TAG_ALL, TAG_FUNDME]) {
        deploy_fund_me(backend, deployer, config, deployments, verifier)?;
    }
    Ok(())
}
