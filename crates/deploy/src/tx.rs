//! EIP-155 legacy transactions.
//!
//! Legacy transactions are accepted by every chain we target, including confidential EVM
//! runtimes that do not support typed envelopes for plain (unencrypted) submissions.

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_core::primitives::{B256, Bytes, TxKind, U256};
use alloy_eips::eip2718::Encodable2718;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use anyhow::Context;

/// An unsigned legacy transaction creating a contract from `init_code`.
pub fn creation_transaction(
    chain_id: u64,
    nonce: u64,
    gas_price: u128,
    gas_limit: u64,
    init_code: Bytes,
) -> TxLegacy {
    TxLegacy {
        chain_id: Some(chain_id),
        nonce,
        gas_price,
        gas_limit,
        to: TxKind::Create,
        value: U256::ZERO,
        input: init_code,
    }
}

/// Sign `tx` with EIP-155 replay protection and encode it for `eth_sendRawTransaction`.
pub fn sign_transaction(
    tx: TxLegacy,
    signer: &PrivateKeySigner,
) -> anyhow::Result<SignedTransaction> {
    let signature = signer
        .sign_hash_sync(&tx.signature_hash())
        .context("Failed to sign transaction")?;
    let envelope = TxEnvelope::from(tx.into_signed(signature));

    Ok(SignedTransaction {
        hash: *envelope.tx_hash(),
        raw: envelope.encoded_2718().into(),
    })
}

/// A signed, encoded transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub hash: B256,
    pub raw: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::{address, b256, hex, keccak256};

    // The worked example from EIP-155.
    fn eip155_example() -> TxLegacy {
        TxLegacy {
            chain_id: Some(1),
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: TxKind::Call(address!("3535353535353535353535353535353535353535")),
            value: U256::from(1_000_000_000_000_000_000u128),
            input: Bytes::new(),
        }
    }

    #[test]
    fn test_eip155_signing_hash() {
        assert_eq!(
            eip155_example().signature_hash(),
            b256!("daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53")
        );
    }

    #[test]
    fn test_eip155_signed_transaction() {
        let signer: PrivateKeySigner =
            "0x4646464646464646464646464646464646464646464646464646464646464646"
                .parse()
                .unwrap();
        let signed = sign_transaction(eip155_example(), &signer).unwrap();
        assert_eq!(
            hex::encode_prefixed(&signed.raw),
            "0xf86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
        assert_eq!(signed.hash, keccak256(&signed.raw));
    }

    #[test]
    fn test_creation_has_empty_to() {
        let tx = creation_transaction(
            23295,
            0,
            100_000_000_000,
            1_000_000,
            Bytes::from_static(&[0x60, 0x80]),
        );
        let signer = PrivateKeySigner::random();
        let signed = sign_transaction(tx, &signer).unwrap();

        // long list header, nonce 0, gas price (0x85 + 5 bytes), gas limit (0x83 + 3), empty `to`
        assert_eq!(signed.raw[0], 0xf8);
        assert_eq!(signed.raw[1] as usize, signed.raw.len() - 2);
        assert_eq!(signed.raw[2], 0x80);
        assert_eq!(signed.raw[3], 0x85);
        assert_eq!(signed.raw[9], 0x83);
        assert_eq!(signed.raw[13], 0x80);
    }
}
