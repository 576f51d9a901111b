use alloy_primitives::{Address, B256, U256};
use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Seed phrase the development network derives its funded accounts from.
pub const DEV_MNEMONIC: &str = "test test test test test test test test test test test junk";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("secret key must be 32 bytes (64 hex chars)")]
    InvalidSecretKey,
    #[error("malformed public key")]
    InvalidPublicKey,
    #[error("invalid signature for transaction from {0}")]
    InvalidSignature(Address),
    #[error("transaction claims sender {claimed} but was signed by {actual}")]
    SenderMismatch { claimed: Address, actual: Address },
}

/// Address of the account controlled by `key`: the last 20 bytes of sha256(pubkey).
pub fn address_of(key: &VerifyingKey) -> Address {
    let digest = Sha256::digest(key.as_bytes());
    Address::from_slice(&digest[12..])
}

/// An ed25519 key labelled with the address it controls.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
    address: Address,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(key: SigningKey) -> Self {
        let address = address_of(&key.verifying_key());
        Self { key, address }
    }

    pub fn random() -> Self {
        Self::new(SigningKey::generate(&mut OsRng))
    }

    /// Deterministic account number `index` of `mnemonic`.
    pub fn from_mnemonic(mnemonic: &str, index: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"fundme-account");
        hasher.update(mnemonic.as_bytes());
        hasher.update(index.to_le_bytes());
        let secret: [u8; 32] = hasher.finalize().into();
        Self::new(SigningKey::from_bytes(&secret))
    }

    pub fn from_hex(sk_hex: &str) -> Result<Self, AccountError> {
        let bytes = hex::decode(sk_hex.trim()).map_err(|_| AccountError::InvalidSecretKey)?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AccountError::InvalidSecretKey)?;
        Ok(Self::new(SigningKey::from_bytes(&secret)))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }

    pub fn sign(&self, tx: TransactionRequest) -> SignedTransaction {
        let signature = self.key.sign(tx.digest().as_slice());
        SignedTransaction {
            tx,
            public_key: self.key.verifying_key().to_bytes().to_vec(),
            signature: signature.to_bytes().to_vec(),
        }
    }
}

/// Deployer plus the other unlocked accounts of a network.
#[derive(Clone, Debug)]
pub struct NamedAccounts {
    pub deployer: Signer,
    pub others: Vec<Signer>,
}

impl NamedAccounts {
    pub fn from_mnemonic(mnemonic: &str, count: u32) -> Self {
        let deployer = Signer::from_mnemonic(mnemonic, 0);
        let others = (1..count.max(1))
            .map(|idx| Signer::from_mnemonic(mnemonic, idx))
            .collect();
        Self { deployer, others }
    }

    /// Same accounts with `deployer` deploying in place of the first one.
    pub fn with_deployer(self, deployer: Signer) -> Self {
        Self {
            deployer,
            others: self.others,
        }
    }

    /// All accounts, deployer first.
    pub fn signers(&self) -> impl Iterator<Item = &Signer> {
        std::iter::once(&self.deployer).chain(self.others.iter())
    }
}

/// What a transaction asks the destination contract to do.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Call {
    Fund,
    Withdraw,
    CheaperWithdraw,
    /// Value sent with empty calldata.
    Receive,
    /// Calldata that matches no entry point.
    Fallback {
        #[serde(with = "crate::account::serde_bytes")]
        data: Vec<u8>,
    },
    UpdateAnswer {
        answer: i128,
    },
}

impl Call {
    /// Selector byte followed by the fixed-width fields of the call.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Call::Fund => vec![0x01],
            Call::Withdraw => vec![0x02],
            Call::CheaperWithdraw => vec![0x03],
            Call::Receive => vec![0x04],
            Call::Fallback { data } => {
                let mut out = Vec::with_capacity(9 + data.len());
                out.push(0x05);
                out.extend_from_slice(&(data.len() as u64).to_be_bytes());
                out.extend_from_slice(data);
                out
            }
            Call::UpdateAnswer { answer } => {
                let mut out = vec![0x06];
                out.extend_from_slice(&answer.to_be_bytes());
                out
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub nonce: u64,
    pub call: Call,
}

impl TransactionRequest {
    pub fn digest(&self) -> B256 {
        let mut hasher = Sha256::new();
        hasher.update(self.from.as_slice());
        hasher.update(self.to.as_slice());
        hasher.update(self.value.to_be_bytes::<32>());
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(self.call.encode());
        let digest: [u8; 32] = hasher.finalize().into();
        B256::from(digest)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: TransactionRequest,
    #[serde(with = "crate::account::serde_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "crate::account::serde_bytes")]
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    pub fn hash(&self) -> B256 {
        self.tx.digest()
    }

    /// Checks the signature and that the signing key controls `tx.from`.
    pub fn recover_sender(&self) -> Result<Address, AccountError> {
        let key_bytes: [u8; 32] = self
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| AccountError::InvalidPublicKey)?;
        let key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| AccountError::InvalidPublicKey)?;
        let signature = Signature::from_slice(&self.signature)
            .map_err(|_| AccountError::InvalidSignature(self.tx.from))?;
        key.verify_strict(self.tx.digest().as_slice(), &signature)
            .map_err(|_| AccountError::InvalidSignature(self.tx.from))?;
        let actual = address_of(&key);
        if actual != self.tx.from {
            return Err(AccountError::SenderMismatch {
                claimed: self.tx.from,
                actual,
            });
        }
        Ok(actual)
    }
}

pub(crate) mod serde_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}
