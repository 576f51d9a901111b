mod common;

use alloy_primitives::{utils::parse_ether, U256};
use fundme_harness::{
    account::{Call, DEV_MNEMONIC},
    chain::{ChainConfig, ChainConfigError, Network},
    deploy::{
        deploy_fund_me, deploy_mocks, run_deploy_scripts, ContractKind, DeployError, Deployments,
        TAG_ALL, TAG_FUNDME, TAG_MOCKS,
    },
    devnet::DevChain,
    verify::{BytecodeVerifier, VerificationCredential, VerificationStatus},
};

use common::Fixture;

#[test]
fn public_network_uses_the_configured_feed() {
    let config = ChainConfig::default();
    let fx = Fixture::on("goerli", &config);
    assert!(fx.deployments.get(ContractKind::MockV3Aggregator).is_err());
    assert_eq!(
        fx.ledger().price_feed(),
        config.entry(5).unwrap().eth_usd_price_feed
    );
}

#[test]
fn allows_people_to_fund_and_withdraw() {
    let mut fx = Fixture::on("sepolia", &ChainConfig::default());
    let deployer = fx.accounts.deployer.clone();
    fx.fund(&deployer, "1");
    fx.chain
        .transact(&deployer, fx.fund_me, U256::ZERO, Call::Withdraw)
        .unwrap();
    assert_eq!(fx.chain.balance_of(fx.fund_me), U256::ZERO);
}

#[test]
fn public_deployments_wait_for_confirmations() {
    let config = ChainConfig::default();
    let fx = Fixture::on("polygon", &config);
    let deployed = fx.deployments.get(ContractKind::FundMe).unwrap();
    let confirmations = config.entry(137).unwrap().block_confirmations;
    assert_eq!(
        fx.chain.block_number(),
        deployed.block_number + confirmations - 1
    );
}

#[test]
fn unsupported_chain_is_a_configuration_error() {
    let config = ChainConfig::default();
    let err =
        DevChain::for_network(Network::new("mainnet", 1), &config, DEV_MNEMONIC).unwrap_err();
    assert!(matches!(
        err,
        DeployError::Config(ChainConfigError::UnsupportedChain { chain_id: 1 })
    ));
}

#[test]
fn verification_runs_only_off_development_networks() {
    let config = ChainConfig::default();

    let (mut chain, accounts) = DevChain::launch("goerli", &config, DEV_MNEMONIC).unwrap();
    let mut verifier = BytecodeVerifier::new(VerificationCredential::new("test-key").unwrap());
    let mut deployments = Deployments::new();
    let deployed = deploy_fund_me(
        &mut chain,
        accounts.deployer.address(),
        &config,
        &mut deployments,
        Some(&mut verifier),
    )
    .unwrap();
    assert!(matches!(
        deployed.verification,
        Some(VerificationStatus::Verified { .. })
    ));
    assert!(verifier.is_verified(5, deployed.address));

    let (mut chain, accounts) = DevChain::launch("hardhat", &config, DEV_MNEMONIC).unwrap();
    let mut verifier = BytecodeVerifier::new(VerificationCredential::new("test-key").unwrap());
    let mut deployments = Deployments::new();
    run_deploy_scripts(
        &mut chain,
        accounts.deployer.address(),
        &config,
        &[TAG_ALL],
        &mut deployments,
        Some(&mut verifier),
    )
    .unwrap();
    let deployed = deployments.get(ContractKind::FundMe).unwrap();
    assert_eq!(deployed.verification, None);
    assert!(!verifier.is_verified(31337, deployed.address));
}

#[test]
fn tags_select_scripts() {
    let config = ChainConfig::default();
    let (mut chain, accounts) = DevChain::launch("localhost", &config, DEV_MNEMONIC).unwrap();
    let deployer = accounts.deployer.address();
    let mut deployments = Deployments::new();

    let err = run_deploy_scripts(
        &mut chain,
        deployer,
        &config,
        &[TAG_FUNDME],
        &mut deployments,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, DeployError::MissingDeployment(_)));
    assert!(deployments.is_empty());

    run_deploy_scripts(
        &mut chain,
        deployer,
        &config,
        &[TAG_MOCKS],
        &mut deployments,
        None,
    )
    .unwrap();
    assert!(deployments.get(ContractKind::MockV3Aggregator).is_ok());
    assert!(deployments.get(ContractKind::FundMe).is_err());

    run_deploy_scripts(
        &mut chain,
        deployer,
        &config,
        &[TAG_FUNDME],
        &mut deployments,
        None,
    )
    .unwrap();
    let fund_me = deployments.get(ContractKind::FundMe).unwrap().address;
    let mock = deployments.get(ContractKind::MockV3Aggregator).unwrap().address;
    assert_eq!(chain.fund_me(fund_me).unwrap().price_feed(), mock);
}

#[test]
fn mocks_are_skipped_on_public_networks() {
    let config = ChainConfig::default();
    let (mut chain, accounts) = DevChain::launch("polygon", &config, DEV_MNEMONIC).unwrap();
    let mut deployments = Deployments::new();
    let mock = deploy_mocks(
        &mut chain,
        accounts.deployer.address(),
        &config,
        &mut deployments,
    )
    .unwrap();
    assert!(mock.is_none());
    assert!(deployments.is_empty());
}

#[test]
fn custom_mock_parameters_drive_the_minimum() {
    let mut config = ChainConfig::default();
    // $100 per ether puts the $50 minimum at half an ether
    config.mock.initial_answer = 100_00000000;
    let mut fx = Fixture::on("hardhat", &config);
    let funder = fx.accounts.others[0].clone();

    assert!(fx
        .chain
        .transact(&funder, fx.fund_me, parse_ether("0.49").unwrap(), Call::Fund)
        .is_err());
    fx.fund(&funder, "0.5");
    assert_eq!(fx.ledger().funders_len(), 1);
}
