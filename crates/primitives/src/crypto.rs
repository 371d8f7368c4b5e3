use alloy_primitives::{keccak256, Address, B256};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, SecretKey, SECP256K1,
};

/// Length of a recoverable signature: 64 compact bytes plus the recovery id.
pub const SIGNATURE_LEN: usize = 65;

/// Errors from signature recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// The signature does not have the expected length.
    #[error("invalid signature length: {0}")]
    InvalidLength(usize),
    /// The signature failed to recover a public key.
    #[error("invalid signature")]
    InvalidSignature,
}

/// Signs the given 32-byte digest, producing a 65-byte recoverable signature.
pub fn sign_hash(hash: B256, secret: &SecretKey) -> [u8; SIGNATURE_LEN] {
    let msg = Message::from_digest(hash.0);
    let (rec_id, data) = SECP256K1
        .sign_ecdsa_recoverable(&msg, secret)
        .serialize_compact();
    let mut sig = [0u8; SIGNATURE_LEN];
    sig[..64].copy_from_slice(&data);
    sig[64] = rec_id.to_i32() as u8;
    sig
}

/// Recovers the signer address of a 65-byte recoverable signature over `hash`.
pub fn recover_signer(hash: B256, signature: &[u8]) -> Result<Address, CryptoError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(CryptoError::InvalidLength(signature.len()))
    }
    let rec_id = RecoveryId::from_i32(signature[64] as i32)
        .map_err(|_| CryptoError::InvalidSignature)?;
    let sig = RecoverableSignature::from_compact(&signature[..64], rec_id)
        .map_err(|_| CryptoError::InvalidSignature)?;
    let msg = Message::from_digest(hash.0);
    let public = SECP256K1
        .recover_ecdsa(&msg, &sig)
        .map_err(|_| CryptoError::InvalidSignature)?;
    Ok(public_key_to_address(&public))
}

/// Derives the address of a public key: the low 20 bytes of the keccak digest
/// of its uncompressed encoding.
pub fn public_key_to_address(public: &PublicKey) -> Address {
    let digest = keccak256(&public.serialize_uncompressed()[1..]);
    Address::from_slice(&digest[12..])
}
