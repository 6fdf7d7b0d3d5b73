//! Binary encoding of signed transactions.
//!
//! Integers are little-endian, strings and byte vectors carry a `u32` length prefix, and enums
//! are a `u8` tag followed by the variant's fields.

use crate::{
    account::AccountId,
    keys::{KeyPair, PublicKey, SIGNATURE_LEN},
};
use bytes::{BufMut, BytesMut};
use sha2::{Digest, Sha256};

/// Tag of ed25519 keys and signatures
const ED25519_TAG: u8 = 0;

/// Tag of the full-access permission
const FULL_ACCESS_TAG: u8 = 1;

/// Types that can be encoded into a transaction.
pub trait Write {
    fn write(&self, buf: &mut impl BufMut);
}

impl Write for u64 {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(*self);
    }
}

impl Write for u128 {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u128_le(*self);
    }
}

impl Write for [u8] {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.len() as u32);
        buf.put_slice(self);
    }
}

impl Write for str {
    fn write(&self, buf: &mut impl BufMut) {
        self.as_bytes().write(buf);
    }
}

impl Write for AccountId {
    fn write(&self, buf: &mut impl BufMut) {
        self.as_str().write(buf);
    }
}

impl Write for PublicKey {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(ED25519_TAG);
        buf.put_slice(&self.to_bytes());
    }
}

impl<T: Write> Write for Vec<T> {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.len() as u32);
        for item in self {
            item.write(buf);
        }
    }
}

/// A single step of a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    CreateAccount,
    DeployContract {
        code: Vec<u8>,
    },
    FunctionCall {
        method: String,
        args: Vec<u8>,
        gas: u64,
        deposit: u128,
    },
    Transfer {
        deposit: u128,
    },
    /// Add a full-access key.
    AddKey {
        public_key: PublicKey,
    },
}

impl Write for Action {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Action::CreateAccount => buf.put_u8(0),
            Action::DeployContract { code } => {
                buf.put_u8(1);
                code.as_slice().write(buf);
            }
            Action::FunctionCall {
                method,
                args,
                gas,
                deposit,
            } => {
                buf.put_u8(2);
                method.as_str().write(buf);
                args.as_slice().write(buf);
                gas.write(buf);
                deposit.write(buf);
            }
            Action::Transfer { deposit } => {
                buf.put_u8(3);
                deposit.write(buf);
            }
            Action::AddKey { public_key } => {
                buf.put_u8(5);
                public_key.write(buf);
                // Access key: nonce, then permission
                0u64.write(buf);
                buf.put_u8(FULL_ACCESS_TAG);
            }
        }
    }
}

/// An unsigned transaction.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub signer: AccountId,
    pub public_key: PublicKey,
    pub nonce: u64,
    pub receiver: AccountId,
    pub block_hash: [u8; 32],
    pub actions: Vec<Action>,
}

impl Write for Transaction {
    fn write(&self, buf: &mut impl BufMut) {
        self.signer.write(buf);
        self.public_key.write(buf);
        self.nonce.write(buf);
        self.receiver.write(buf);
        buf.put_slice(&self.block_hash);
        self.actions.write(buf);
    }
}

impl Transaction {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.write(&mut buf);
        buf
    }

    /// Returns the hash the transaction is identified (and signed) by.
    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(self.encode()).into()
    }

    /// Sign with `key` and encode the signed transaction.
    pub fn sign(&self, key: &KeyPair) -> BytesMut {
        let signature = key.sign(&self.hash());
        let mut buf = self.encode();
        buf.reserve(1 + SIGNATURE_LEN);
        buf.put_u8(ED25519_TAG);
        buf.put_slice(&signature);
        buf
    }
}
