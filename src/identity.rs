//! Signing identities used to generate load.

use crate::constants::MIN_POOL_SIZE;
use alloy::{
    consensus::{SignableTransaction, TxEnvelope, TxLegacy},
    primitives::{Address, Bytes, TxKind, U256},
    signers::{
        SignerSync,
        local::{LocalSignerError, PrivateKeySigner},
    },
};
use rand::Rng;
use std::str::FromStr;

/// Errors that can occur when drawing from an [`IdentityPool`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The pool is too small for the requested draw.
    #[error("identity pool has {size} identities, at least {required} are required")]
    EmptyPool {
        /// Size of the pool.
        size: usize,
        /// Size the draw requires.
        required: usize,
    },
}

/// The fields of a value transfer, before signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFields {
    /// Recipient.
    pub to: Address,
    /// Value in wei.
    pub value: U256,
    /// Sender sequence number.
    pub nonce: u64,
    /// Gas price in wei.
    pub gas_price: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// EIP-155 chain id.
    pub chain_id: u64,
}

/// A signed transfer, ready to broadcast.
#[derive(Debug, Clone)]
pub struct SignedTransfer {
    /// The signing identity's address.
    pub from: Address,
    /// The sequence number the transfer was signed with.
    pub nonce: u64,
    /// The signed transaction.
    pub envelope: TxEnvelope,
}

impl SignedTransfer {
    /// Hash of the signed transaction.
    pub fn tx_hash(&self) -> alloy::primitives::TxHash {
        *self.envelope.tx_hash()
    }
}

/// An address plus the key that signs for it.
#[derive(Debug, Clone)]
pub struct Identity {
    signer: PrivateKeySigner,
}

impl Identity {
    /// Generate an identity with fresh key material.
    pub fn random() -> Self {
        Self { signer: PrivateKeySigner::random() }
    }

    /// Load an identity from a hex-encoded private key.
    pub fn from_key(key: &str) -> Result<Self, LocalSignerError> {
        PrivateKeySigner::from_str(key).map(|signer| Self { signer })
    }

    /// The identity's address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign a legacy value transfer.
    pub fn sign_transfer(
        &self,
        fields: TransferFields,
    ) -> Result<SignedTransfer, alloy::signers::Error> {
        let tx = TxLegacy {
            chain_id: Some(fields.chain_id),
            nonce: fields.nonce,
            gas_price: fields.gas_price,
            gas_limit: fields.gas_limit,
            to: TxKind::Call(fields.to),
            value: fields.value,
            input: Bytes::new(),
        };
        let signature = self.signer.sign_hash_sync(&tx.signature_hash())?;
        Ok(SignedTransfer {
            from: self.address(),
            nonce: fields.nonce,
            envelope: TxEnvelope::Legacy(tx.into_signed(signature)),
        })
    }
}

/// A fixed set of identities for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    identities: Vec<Identity>,
}

impl IdentityPool {
    /// Create a pool of `n` fresh identities.
    pub fn create(n: usize) -> Self {
        Self { identities: (0..n).map(|_| Identity::random()).collect() }
    }

    /// Create a pool that holds at least [`MIN_POOL_SIZE`] identities.
    pub fn create_validated(n: usize) -> Result<Self, PoolError> {
        if n < MIN_POOL_SIZE {
            return Err(PoolError::EmptyPool { size: n, required: MIN_POOL_SIZE });
        }
        Ok(Self::create(n))
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// True if the pool has no identities.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Iterate over the identities.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.iter()
    }

    /// Pick an identity uniformly at random.
    pub fn pick_random<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&Identity, PoolError> {
        if self.identities.is_empty() {
            return Err(PoolError::EmptyPool { size: 0, required: 1 });
        }
        Ok(&self.identities[rng.random_range(0..self.identities.len())])
    }

    /// Pick a sender and a distinct receiver. The receiver is redrawn until it
    /// differs from the sender.
    pub fn pick_distinct_pair<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<(&Identity, &Identity), PoolError> {
        if self.identities.len() < MIN_POOL_SIZE {
            return Err(PoolError::EmptyPool {
                size: self.identities.len(),
                required: MIN_POOL_SIZE,
            });
        }

        let sender = self.pick_random(rng)?;
        loop {
            let receiver = self.pick_random(rng)?;
            if receiver.address() != sender.address() {
                return Ok((sender, receiver));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};
    use std::collections::HashSet;

    #[test]
    fn create_yields_unique_identities() {
        let pool = IdentityPool::create(16);
        let addresses: HashSet<_> = pool.iter().map(Identity::address).collect();
        assert_eq!(pool.len(), 16);
        assert_eq!(addresses.len(), 16);
    }

    #[test]
    fn distinct_pair_never_repeats_sender() {
        let mut rng = StdRng::seed_from_u64(7);
        for size in [2, 3, 10] {
            let pool = IdentityPool::create(size);
            for _ in 0..10_000 {
                let (sender, receiver) = pool.pick_distinct_pair(&mut rng).unwrap();
                assert_ne!(sender.address(), receiver.address());
            }
        }
    }

    #[test]
    fn distinct_pair_requires_two_identities() {
        let mut rng = StdRng::seed_from_u64(7);
        let pool = IdentityPool::create(1);
        assert_eq!(
            pool.pick_distinct_pair(&mut rng).unwrap_err(),
            PoolError::EmptyPool { size: 1, required: 2 }
        );
        assert!(pool.pick_random(&mut rng).is_ok());

        let empty = IdentityPool::create(0);
        assert!(empty.pick_random(&mut rng).is_err());
    }

    #[test]
    fn validated_pool_rejects_small_sizes() {
        assert!(IdentityPool::create_validated(1).is_err());
        assert_eq!(IdentityPool::create_validated(2).unwrap().len(), 2);
    }

    #[test]
    fn signed_transfer_carries_fields() {
        let identity = Identity::random();
        let to = Address::repeat_byte(0x11);
        let signed = identity
            .sign_transfer(TransferFields {
                to,
                value: U256::from(5),
                nonce: 3,
                gas_price: 1_000_000_000,
                gas_limit: 21_000,
                chain_id: 31337,
            })
            .unwrap();

        assert_eq!(signed.from, identity.address());
        assert_eq!(signed.nonce, 3);
        let TxEnvelope::Legacy(tx) = &signed.envelope else { panic!("expected legacy tx") };
        assert_eq!(tx.tx().to, TxKind::Call(to));
        assert_eq!(tx.tx().chain_id, Some(31337));
    }

    #[test]
    fn from_key_roundtrips_address() {
        let key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let identity = Identity::from_key(key).unwrap();
        assert_eq!(
            identity.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse::<Address>().unwrap()
        );
    }
}
