use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::crypto::{sha256_hex, verify_signature, Address, DigitalSignature, PublicKeyHex, Wallet};
use super::utxo::UtxoPool;

/// Tolerance used when comparing summed amounts
pub const AMOUNT_EPSILON: f64 = 1e-9;

/// Errors that can occur during transaction construction
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid fee: {0}")]
    InvalidFee(String),

    #[error("Invalid outpoint: {0}")]
    InvalidOutPoint(String),
}

/// Why a transaction was refused by verification
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("transaction id {claimed} does not match its contents ({computed})")]
    IdMismatch { claimed: String, computed: String },

    #[error("unknown or already spent output {0}")]
    UnknownUtxo(OutPoint),

    #[error("input {0} is not signed")]
    MissingSignature(OutPoint),

    #[error("signature for {0} does not verify")]
    InvalidSignature(OutPoint),

    #[error("malformed signature or key on {outpoint}: {detail}")]
    Malformed { outpoint: OutPoint, detail: String },

    #[error("signer of {outpoint} is {signer}, but the output belongs to {owner}")]
    OwnerMismatch {
        outpoint: OutPoint,
        signer: Address,
        owner: Address,
    },

    #[error("output {0} is spent twice in the same transaction")]
    DuplicateInput(OutPoint),

    #[error("transaction has no inputs")]
    NoInputs,

    #[error("outputs {outputs} plus fee {fee} exceed inputs {inputs}")]
    Overspend { inputs: f64, outputs: f64, fee: f64 },
}

/// Which checks `Transaction::validate` applies beyond signature validity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyPolicy {
    /// Require the signing key to hash to the referenced output's owner
    #[serde(default = "default_true")]
    pub bind_owner: bool,

    /// Require inputs to cover outputs plus fee, and at least one input
    #[serde(default = "default_true")]
    pub enforce_balance: bool,
}

fn default_true() -> bool {
    true
}

impl VerifyPolicy {
    pub fn strict() -> Self {
        VerifyPolicy {
            bind_owner: true,
            enforce_balance: true,
        }
    }

    /// Signature-against-embedded-key only, with no owner or balance checks
    pub fn permissive() -> Self {
        VerifyPolicy {
            bind_owner: false,
            enforce_balance: false,
        }
    }
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

/// Reference to one output of a prior transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: String,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: impl Into<String>, index: u32) -> Self {
        OutPoint {
            txid: txid.into(),
            index,
        }
    }

    /// The bytes an input signature commits to
    pub fn challenge(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

impl FromStr for OutPoint {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, index) = s
            .rsplit_once(':')
            .ok_or_else(|| TransactionError::InvalidOutPoint(s.to_string()))?;
        let index = index
            .parse()
            .map_err(|_| TransactionError::InvalidOutPoint(s.to_string()))?;

        Ok(OutPoint::new(txid, index))
    }
}

/// Spendable value owned by an address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub amount: f64,

    #[serde(rename = "address")]
    pub owner: Address,
}

impl TransactionOutput {
    pub fn new(amount: f64, owner: Address) -> Self {
        TransactionOutput { amount, owner }
    }

    fn canonical(&self) -> Value {
        json!({
            "amount": self.amount,
            "address": self.owner,
        })
    }
}

/// Spends exactly one prior output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionInput {
    #[serde(rename = "txid")]
    pub referenced_txid: String,

    #[serde(rename = "index")]
    pub output_index: u32,

    pub signature: Option<DigitalSignature>,

    #[serde(rename = "pubkey")]
    pub public_key: Option<PublicKeyHex>,
}

impl TransactionInput {
    /// Creates an unsigned input
    pub fn new(referenced_txid: impl Into<String>, output_index: u32) -> Self {
        TransactionInput {
            referenced_txid: referenced_txid.into(),
            output_index,
            signature: None,
            public_key: None,
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.referenced_txid.clone(), self.output_index)
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some() && self.public_key.is_some()
    }

    fn canonical(&self, include_signature: bool) -> Value {
        if include_signature {
            json!({
                "txid": self.referenced_txid,
                "index": self.output_index,
                "signature": self.signature,
                "pubkey": self.public_key,
            })
        } else {
            json!({
                "txid": self.referenced_txid,
                "index": self.output_index,
            })
        }
    }
}

impl From<OutPoint> for TransactionInput {
    fn from(outpoint: OutPoint) -> Self {
        TransactionInput::new(outpoint.txid, outpoint.index)
    }
}

/// Represents a transaction in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    txid: String,
    inputs: Vec<TransactionInput>,
    outputs: Vec<TransactionOutput>,
    fee: f64,

    /// Block height a reward was issued at; keeps identical rewards apart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    height: Option<u64>,
}

fn check_amount(amount: f64) -> Result<(), TransactionError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(TransactionError::InvalidAmount(format!(
            "Amount must be a non-negative number: {}",
            amount
        )));
    }
    Ok(())
}

impl Transaction {
    /// Creates a new unsigned transaction and fixes its id
    ///
    /// Funding is not checked here; it is a property of the UTXO pool at
    /// spend time.
    pub fn new(
        inputs: Vec<TransactionInput>,
        outputs: Vec<TransactionOutput>,
        fee: f64,
    ) -> Result<Self, TransactionError> {
        for output in &outputs {
            check_amount(output.amount)?;
        }
        if !fee.is_finite() || fee < 0.0 {
            return Err(TransactionError::InvalidFee(format!(
                "Fee must be a non-negative number: {}",
                fee
            )));
        }

        Ok(Self::assemble(inputs, outputs, fee, None))
    }

    /// Creates a transaction with no inputs paying `amount` to `recipient`
    pub fn coinbase(recipient: Address, amount: f64) -> Result<Self, TransactionError> {
        check_amount(amount)?;
        Ok(Self::assemble(
            Vec::new(),
            vec![TransactionOutput::new(amount, recipient)],
            0.0,
            None,
        ))
    }

    /// Creates a block reward, tagged with the height it is issued at
    pub fn reward(recipient: Address, amount: f64, height: u64) -> Result<Self, TransactionError> {
        check_amount(amount)?;
        Ok(Self::assemble(
            Vec::new(),
            vec![TransactionOutput::new(amount, recipient)],
            0.0,
            Some(height),
        ))
    }

    fn assemble(
        inputs: Vec<TransactionInput>,
        outputs: Vec<TransactionOutput>,
        fee: f64,
        height: Option<u64>,
    ) -> Self {
        let mut transaction = Transaction {
            txid: String::new(),
            inputs,
            outputs,
            fee,
            height,
        };
        transaction.txid = transaction.compute_txid();
        transaction
    }

    pub fn txid(&self) -> &str {
        &self.txid
    }

    pub fn inputs(&self) -> &[TransactionInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TransactionOutput] {
        &self.outputs
    }

    pub fn fee(&self) -> f64 {
        self.fee
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Canonical encoding of the transaction body (everything but the id)
    fn body(&self, include_signatures: bool) -> Value {
        let mut body = json!({
            "inputs": self
                .inputs
                .iter()
                .map(|input| input.canonical(include_signatures))
                .collect::<Vec<_>>(),
            "outputs": self
                .outputs
                .iter()
                .map(TransactionOutput::canonical)
                .collect::<Vec<_>>(),
            "fee": self.fee,
        });

        if let (Some(height), Some(map)) = (self.height, body.as_object_mut()) {
            map.insert("height".to_string(), json!(height));
        }

        body
    }

    /// Hash of the unsigned body; independent of signature content
    pub fn compute_txid(&self) -> String {
        sha256_hex(self.body(false).to_string().as_bytes())
    }

    /// True when the stored id still matches the body
    pub fn has_valid_id(&self) -> bool {
        self.txid == self.compute_txid()
    }

    /// The canonical record used for block hashing, persistence and display
    pub fn to_record(&self) -> Value {
        let mut record = self.body(true);
        if let Some(map) = record.as_object_mut() {
            map.insert("txid".to_string(), json!(self.txid));
        }
        record
    }

    /// Signs every input with `wallet`, storing the signature and public key
    ///
    /// Signing with a wallet that does not own the referenced outputs is not
    /// an error here; it surfaces later as a failed verification.
    pub fn sign(&mut self, wallet: &Wallet) {
        let public_key = wallet.public_key_hex();

        for input in &mut self.inputs {
            let signature = wallet.sign(&input.outpoint().challenge());
            input.signature = Some(signature);
            input.public_key = Some(public_key.clone());
        }
    }

    /// Checks every input against `utxo_pool` under the strict policy
    pub fn verify(&self, utxo_pool: &UtxoPool) -> bool {
        self.verify_with(utxo_pool, VerifyPolicy::strict())
    }

    pub fn verify_with(&self, utxo_pool: &UtxoPool, policy: VerifyPolicy) -> bool {
        self.validate(utxo_pool, policy).is_ok()
    }

    /// Verifies the transaction against `utxo_pool`, reporting the first failure
    pub fn validate(&self, utxo_pool: &UtxoPool, policy: VerifyPolicy) -> Result<(), RejectReason> {
        // Outputs are keyed by txid, so a forged id could overwrite live UTXOs.
        let computed = self.compute_txid();
        if self.txid != computed {
            return Err(RejectReason::IdMismatch {
                claimed: self.txid.clone(),
                computed,
            });
        }

        if policy.enforce_balance && self.inputs.is_empty() {
            return Err(RejectReason::NoInputs);
        }

        let mut seen = HashSet::new();
        let mut input_total = 0.0;

        for input in &self.inputs {
            let outpoint = input.outpoint();
            if !seen.insert(outpoint.clone()) {
                return Err(RejectReason::DuplicateInput(outpoint));
            }

            let output = utxo_pool
                .get(&outpoint)
                .ok_or_else(|| RejectReason::UnknownUtxo(outpoint.clone()))?;

            let (signature, public_key) = match (&input.signature, &input.public_key) {
                (Some(signature), Some(public_key)) => (signature, public_key),
                _ => return Err(RejectReason::MissingSignature(outpoint)),
            };

            match verify_signature(&outpoint.challenge(), signature, public_key) {
                Ok(true) => {}
                Ok(false) => return Err(RejectReason::InvalidSignature(outpoint)),
                Err(e) => {
                    return Err(RejectReason::Malformed {
                        outpoint,
                        detail: e.to_string(),
                    })
                }
            }

            if policy.bind_owner {
                let signer = public_key.address().map_err(|e| RejectReason::Malformed {
                    outpoint: outpoint.clone(),
                    detail: e.to_string(),
                })?;
                if signer != output.owner {
                    return Err(RejectReason::OwnerMismatch {
                        outpoint,
                        signer,
                        owner: output.owner.clone(),
                    });
                }
            }

            input_total += output.amount;
        }

        if policy.enforce_balance {
            let outputs = self.output_total();
            // Tolerance scales with the amounts so large change still balances.
            if outputs + self.fee > input_total + AMOUNT_EPSILON * input_total.max(1.0) {
                return Err(RejectReason::Overspend {
                    inputs: input_total,
                    outputs,
                    fee: self.fee,
                });
            }
        }

        Ok(())
    }

    pub fn output_total(&self) -> f64 {
        self.outputs.iter().map(|output| output.amount).sum()
    }

    /// Value of the referenced outputs that are present in `utxo_pool`
    pub fn input_total(&self, utxo_pool: &UtxoPool) -> f64 {
        self.inputs
            .iter()
            .filter_map(|input| utxo_pool.get(&input.outpoint()))
            .map(|output| output.amount)
            .sum()
    }
}
