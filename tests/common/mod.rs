#![allow(dead_code)]

use alloy_primitives::{utils::parse_ether, Address};
use fundme_harness::{
    account::{Call, DEV_MNEMONIC},
    chain::ChainConfig,
    deploy::{run_deploy_scripts, ContractKind, Deployments, TAG_ALL},
    devnet::DevChain,
    ledger::FundingLedger,
    NamedAccounts, Signer,
};

/// A chain with every deploy script already run, like a fresh deployment fixture.
pub struct Fixture {
    pub chain: DevChain,
    pub accounts: NamedAccounts,
    pub deployments: Deployments,
    pub fund_me: Address,
}

impl Fixture {
    pub fn development() -> Self {
        Self::on("hardhat", &ChainConfig::default())
    }

    pub fn on(network: &str, config: &ChainConfig) -> Self {
        let (mut chain, accounts) = DevChain::launch(network, config, DEV_MNEMONIC).unwrap();
        let mut deployments = Deployments::new();
        run_deploy_scripts(
            &mut chain,
            accounts.deployer.address(),
            config,
            &[TAG_ALL],
            &mut deployments,
            None,
        )
        .unwrap();
        let fund_me = deployments.get(ContractKind::FundMe).unwrap().address;
        Self {
            chain,
            accounts,
            deployments,
            fund_me,
        }
    }

    pub fn ledger(&self) -> &FundingLedger {
        self.chain.fund_me(self.fund_me).unwrap()
    }

    pub fn fund(&mut self, signer: &Signer, ether: &str) {
        self.chain
            .transact(signer, self.fund_me, parse_ether(ether).unwrap(), Call::Fund)
            .unwrap();
    }
}
