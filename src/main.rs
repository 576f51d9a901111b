use std::{
    fs,
    path::{Path, PathBuf},
};

use alloy_primitives::{
    utils::{format_ether, parse_ether},
    Address, U256,
};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fundme_harness::{
    account::{Call, DEV_MNEMONIC},
    chain::{ChainConfig, Network},
    deploy::{run_deploy_scripts, ContractKind, Deployments, TAG_ALL},
    devnet::{dev_account_balance, DevChain},
    verify::{BytecodeVerifier, VerificationCredential, Verifier},
    NamedAccounts, Signer,
};

/// FundMe deployment and test harness
///
/// Deploys the FundMe ledger with a mock price feed on development networks, or
/// wired to the configured aggregator on public ones, and exercises it.
#[derive(Debug, Parser)]
#[clap(name = "fundme", version)]
struct CliOptions {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the effective chain configuration
    Networks {
        #[clap(flatten)]
        config: ConfigArgs,
    },
    /// Run the deploy scripts and print the resulting deployments
    Deploy(DeployArgs),
    /// Deploy, fund from several accounts, then withdraw as the deployer
    FundAndWithdraw {
        #[clap(flatten)]
        deploy: DeployArgs,

        /// Number of funding accounts (the deployer excluded)
        #[clap(long, default_value = "5", value_name = "N")]
        funders: u32,

        /// Value each funder sends, in ether
        #[clap(long, default_value = "1", value_name = "ETH")]
        value: String,

        /// Use the cheaper withdrawal path
        #[clap(long)]
        cheaper: bool,
    },
    /// Generate an account key and write sk.hex, pk.hex and address.txt
    Keygen {
        #[clap(long, value_name = "DIR")]
        out_dir: PathBuf,
    },
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// JSON chain configuration replacing the built-in table
    #[clap(long, env = "FUNDME_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,
}

impl ConfigArgs {
    fn load(&self) -> anyhow::Result<ChainConfig> {
        match &self.config {
            Some(path) => Ok(ChainConfig::load(path)?),
            None => Ok(ChainConfig::default()),
        }
    }
}

#[derive(Debug, Args)]
struct DeployArgs {
    /// Target network name
    #[clap(long, short, default_value = "hardhat", value_name = "NAME")]
    network: String,

    /// Chain id to report instead of the one configured for the network name
    #[clap(long, value_name = "ID")]
    chain_id: Option<u64>,

    /// Deploy script tags to run
    #[clap(long, default_values_t = vec![TAG_ALL.to_string()], value_name = "TAG")]
    tags: Vec<String>,

    /// Mnemonic the unlocked accounts are derived from
    #[clap(long, default_value = DEV_MNEMONIC, hide_default_value = true)]
    mnemonic: String,

    /// Deployer secret key file (the sk.hex `keygen` writes) used instead of the
    /// first mnemonic account
    #[clap(long, env = "FUNDME_DEPLOYER_KEY", value_name = "FILE")]
    deployer_key: Option<PathBuf>,

    /// Explorer credential; verification is skipped without it
    #[clap(long, env = "ETHERSCAN_API_KEY", hide_env_values = true)]
    etherscan_api_key: Option<String>,

    #[clap(flatten)]
    config: ConfigArgs,
}

impl DeployArgs {
    fn launch(&self) -> anyhow::Result<(DevChain, NamedAccounts, Deployments)> {
        let config = self.config.load()?;
        let (mut chain, accounts) = match self.chain_id {
            Some(chain_id) => DevChain::for_network(
                Network::new(self.network.clone(), chain_id),
                &config,
                &self.mnemonic,
            )?,
            None => DevChain::launch(&self.network, &config, &self.mnemonic)?,
        };
        let accounts = match &self.deployer_key {
            Some(path) => {
                let sk_hex = fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let deployer = Signer::from_hex(&sk_hex)?;
                chain.set_balance(deployer.address(), dev_account_balance());
                info!(
                    deployer = %deployer.address(),
                    "deployer key loaded from {}",
                    path.display()
                );
                accounts.with_deployer(deployer)
            }
            None => accounts,
        };

        let mut verifier = match &self.etherscan_api_key {
            Some(key) => Some(BytecodeVerifier::new(VerificationCredential::new(key.clone())?)),
            None => None,
        };
        let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        let mut deployments = Deployments::new();
        run_deploy_scripts(
            &mut chain,
            accounts.deployer.address(),
            &config,
            &tags,
            &mut deployments,
            verifier.as_mut().map(|v| v as &mut dyn Verifier),
        )?;
        Ok((chain, accounts, deployments))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawReport {
    fund_me: Address,
    funders: Vec<Address>,
    value_each: String,
    starting_fund_me_balance: String,
    starting_deployer_balance: String,
    ending_fund_me_balance: String,
    ending_deployer_balance: String,
    cheaper: bool,
}

fn fund_and_withdraw(
    deploy: &DeployArgs,
    funders: u32,
    value: &str,
    cheaper: bool,
) -> anyhow::Result<WithdrawReport> {
    let (mut chain, accounts, deployments) = deploy.launch()?;
    let fund_me = deployments.get(ContractKind::FundMe)?.address;
    let value_each =
        parse_ether(value).map_err(|err| anyhow::anyhow!("invalid --value {value}: {err}"))?;
    if funders as usize > accounts.others.len() {
        bail!(
            "only {} funding accounts available, {funders} requested",
            accounts.others.len()
        );
    }

    let mut funded = Vec::new();
    for signer in accounts.others.iter().take(funders as usize) {
        chain.transact(signer, fund_me, value_each, Call::Fund)?;
        funded.push(signer.address());
    }

    let deployer = accounts.deployer.address();
    let starting_fund_me_balance = chain.balance_of(fund_me);
    let starting_deployer_balance = chain.balance_of(deployer);

    info!("Withdrawing contracts ...");
    let call = if cheaper {
        Call::CheaperWithdraw
    } else {
        Call::Withdraw
    };
    chain.transact(&accounts.deployer, fund_me, U256::ZERO, call)?;
    info!("Withdrawn!");

    Ok(WithdrawReport {
        fund_me,
        funders: funded,
        value_each: format_ether(value_each),
        starting_fund_me_balance: format_ether(starting_fund_me_balance),
        starting_deployer_balance: format_ether(starting_deployer_balance),
        ending_fund_me_balance: format_ether(chain.balance_of(fund_me)),
        ending_deployer_balance: format_ether(chain.balance_of(deployer)),
        cheaper,
    })
}

fn keygen(out_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let signer = Signer::random();
    fs::write(out_dir.join("sk.hex"), signer.secret_hex())?;
    fs::write(out_dir.join("pk.hex"), signer.public_hex())?;
    fs::write(out_dir.join("address.txt"), signer.address().to_string())?;
    println!("keypair for {} written → {}", signer.address(), out_dir.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let opts = CliOptions::parse();
    match opts.command {
        Command::Networks { config } => {
            println!("{}", serde_json::to_string_pretty(&config.load()?)?);
        }
        Command::Deploy(args) => {
            let (_, _, deployments) = args.launch()?;
            let all: Vec<_> = deployments.iter().collect();
            println!("{}", serde_json::to_string_pretty(&all)?);
        }
        Command::FundAndWithdraw {
            deploy,
            funders,
            value,
            cheaper,
        } => {
            let report = fund_and_withdraw(&deploy, funders, &value, cheaper)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Keygen { out_dir } => keygen(&out_dir)?,
    }
    Ok(())
}
