use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

/// Shared secp256k1 context, built once.
static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Hex SHA-256 digest of arbitrary bytes
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Represents a wallet address (hex SHA-256 of the compressed public key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    /// Derives the address of a public key
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let bytes: [u8; PUBLIC_KEY_SIZE] = public_key.serialize();
        Address(sha256_hex(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::DecodingError(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(CryptoError::DecodingError(format!(
                "Address must be 32 bytes, got {}",
                bytes.len()
            )));
        }

        Ok(Address(s.to_lowercase()))
    }
}

/// Hex encoding of a compressed secp256k1 public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKeyHex(pub String);

impl PublicKeyHex {
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        PublicKeyHex(hex::encode(public_key.serialize()))
    }

    /// Decodes back into a curve point
    pub fn to_public_key(&self) -> Result<PublicKey, CryptoError> {
        let bytes = hex::decode(&self.0).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        PublicKey::from_slice(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    /// Address this key controls
    pub fn address(&self) -> Result<Address, CryptoError> {
        Ok(Address::from_public_key(&self.to_public_key()?))
    }
}

/// Represents a digital signature (hex of the 64-byte compact ECDSA form)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    /// Creates a new digital signature from a signature
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(hex::encode(signature.serialize_compact()))
    }

    /// Converts the digital signature to a signature
    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = hex::decode(&self.0).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        if bytes.len() != COMPACT_SIGNATURE_SIZE {
            return Err(CryptoError::InvalidSignature(format!(
                "Signature must be {} bytes, got {}",
                COMPACT_SIGNATURE_SIZE,
                bytes.len()
            )));
        }

        Signature::from_compact(&bytes).map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }
}

/// Exportable view of a wallet's key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletKeys {
    pub name: String,
    pub private_key: String,
    pub public_key: String,
    pub address: String,
}

/// Represents a wallet with a secp256k1 keypair
#[derive(Debug, Clone)]
pub struct Wallet {
    name: String,
    secret_key: SecretKey,
    public_key: PublicKey,
    address: Address,
}

impl Wallet {
    /// Creates a new unnamed wallet with a random keypair
    pub fn new() -> Self {
        Self::with_name("")
    }

    /// Creates a new wallet with a random keypair and a display name
    pub fn with_name(name: impl Into<String>) -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        Self::from_parts(name.into(), secret_key)
    }

    /// Creates a wallet from an existing 32-byte secret key
    pub fn from_secret_key(name: impl Into<String>, secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret_key = SecretKey::from_slice(secret_key_bytes)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;

        Ok(Self::from_parts(name.into(), secret_key))
    }

    fn from_parts(name: String, secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP, &secret_key);
        let address = Address::from_public_key(&public_key);

        Wallet {
            name,
            secret_key,
            public_key,
            address,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the wallet's address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Gets the wallet's public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn public_key_hex(&self) -> PublicKeyHex {
        PublicKeyHex::from_public_key(&self.public_key)
    }

    /// Signs SHA-256(message) with the wallet's private key
    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        let digest: [u8; 32] = Sha256::digest(message).into();
        let signature = SECP.sign_ecdsa(&Message::from_digest(digest), &self.secret_key);
        DigitalSignature::from_signature(&signature)
    }

    /// Exports the wallet's secret key as bytes
    pub fn export_secret_key(&self) -> Vec<u8> {
        self.secret_key.secret_bytes().to_vec()
    }

    /// Hex record of the key material, for display and export
    pub fn keys(&self) -> WalletKeys {
        WalletKeys {
            name: self.name.clone(),
            private_key: hex::encode(self.secret_key.secret_bytes()),
            public_key: self.public_key_hex().0,
            address: self.address.0.clone(),
        }
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies a signature against a message and public key.
///
/// Malformed encodings are errors; a well-formed signature that does not
/// match yields `Ok(false)`.
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    public_key: &PublicKeyHex,
) -> Result<bool, CryptoError> {
    let signature = signature.to_signature()?;
    let public_key = public_key.to_public_key()?;
    let digest: [u8; 32] = Sha256::digest(message).into();

    Ok(SECP
        .verify_ecdsa(&Message::from_digest(digest), &signature, &public_key)
        .is_ok())
}
