//! Post-deployment source verification.
//!
//! A verifier re-derives the creation code of a contract from its artifact and the
//! constructor arguments the deployer claims to have used, and compares it with what
//! the network recorded at the deployed address.

use std::collections::BTreeSet;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::deploy::ContractKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("no contract deployed at {0}")]
    NotDeployed(Address),
    #[error("creation code at {address} does not match {contract} with the given constructor arguments")]
    BytecodeMismatch { address: Address, contract: String },
    #[error("malformed constructor arguments: {0}")]
    MalformedArguments(String),
    #[error("verification credential is empty")]
    MissingCredential,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationCredential {
    api_key: String,
}

impl VerificationCredential {
    pub fn new(api_key: impl Into<String>) -> Result<Self, VerifyError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(VerifyError::MissingCredential);
        }
        Ok(Self { api_key })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyRequest {
    pub address: Address,
    pub chain_id: u64,
    pub contract: ContractKind,
    /// ABI-encoded constructor arguments, hex without 0x.
    pub constructor_args: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified { guid: String },
    AlreadyVerified,
    Failed { reason: String },
}

/// Read access to the creation code a network recorded per address.
pub trait CodeSource {
    fn creation_code_hash(&self, address: Address) -> Option<B256>;
}

pub trait Verifier {
    fn verify(
        &mut self,
        request: &VerifyRequest,
        code: &dyn CodeSource,
    ) -> Result<VerificationStatus, VerifyError>;
}

/// Hash of the creation code `contract` deploys with `encoded_args` appended.
pub fn creation_code_hash(contract: ContractKind, encoded_args: &[u8]) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update(b"creation");
    hasher.update(contract.name().as_bytes());
    hasher.update(encoded_args);
    let digest: [u8; 32] = hasher.finalize().into();
    B256::from(digest)
}

/// Checks creation code locally and remembers what it has already verified.
#[derive(Debug)]
pub struct BytecodeVerifier {
    credential: VerificationCredential,
    verified: BTreeSet<(u64, Address)>,
}

impl BytecodeVerifier {
    pub fn new(credential: VerificationCredential) -> Self {
        Self {
            credential,
            verified: BTreeSet::new(),
        }
    }

    pub fn is_verified(&self, chain_id: u64, address: Address) -> bool {
        self.verified.contains(&(chain_id, address))
    }

    fn guid(&self, request: &VerifyRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.credential.api_key.as_bytes());
        hasher.update(request.chain_id.to_le_bytes());
        hasher.update(request.address.as_slice());
        hex::encode(&hasher.finalize()[..16])
    }
}

impl Verifier for BytecodeVerifier {
    fn verify(
        &mut self,
        request: &VerifyRequest,
        code: &dyn CodeSource,
    ) -> Result<VerificationStatus, VerifyError> {
        if self.is_verified(request.chain_id, request.address) {
            tracing::info!(address = %request.address, "contract already verified");
            return Ok(VerificationStatus::AlreadyVerified);
        }
        let recorded = code
            .creation_code_hash(request.address)
            .ok_or(VerifyError::NotDeployed(request.address))?;
        let args = hex::decode(&request.constructor_args)
            .map_err(|err| VerifyError::MalformedArguments(err.to_string()))?;
        if creation_code_hash(request.contract, &args) != recorded {
            return Err(VerifyError::BytecodeMismatch {
                address: request.address,
                contract: request.contract.name().to_string(),
            });
        }
        self.verified.insert((request.chain_id, request.address));
        let guid = self.guid(request);
        tracing::info!(address = %request.address, %guid, "verified {}", request.contract.name());
        Ok(VerificationStatus::Verified { guid })
    }
}
