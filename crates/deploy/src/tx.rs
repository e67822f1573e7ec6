//! Locally signed contract-creation transactions.

use alloy_core::{
    primitives::{B256, Bytes, U256, keccak256},
    rlp::{EMPTY_STRING_CODE, Encodable, Header},
};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;

/// An EIP-155 legacy transaction with an empty `to` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub value: U256,
    /// Creation bytecode followed by the encoded constructor arguments.
    pub input: Bytes,
}

impl CreationTransaction {
    /// Hash signed by the sender: `keccak(rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0]))`.
    pub fn signing_hash(&self) -> B256 {
        let payload_length = self.fields_length() + self.chain_id.length() + 2;

        let mut out = Vec::with_capacity(payload_length + 4);
        Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.encode_fields(&mut out);
        self.chain_id.encode(&mut out);
        0u8.encode(&mut out);
        0u8.encode(&mut out);

        keccak256(&out)
    }

    /// Sign with `signer` and return the raw transaction for `eth_sendRawTransaction`.
    pub fn sign(&self, signer: &PrivateKeySigner) -> Result<Bytes, alloy_signer::Error> {
        let signature = signer.sign_hash_sync(&self.signing_hash())?;

        let v = self.chain_id * 2 + 35 + u64::from(signature.v());
        let r = signature.r();
        let s = signature.s();

        let payload_length = self.fields_length() + v.length() + r.length() + s.length();

        let mut out = Vec::with_capacity(payload_length + 4);
        Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.encode_fields(&mut out);
        v.encode(&mut out);
        r.encode(&mut out);
        s.encode(&mut out);

        Ok(out.into())
    }

    fn encode_fields(&self, out: &mut Vec<u8>) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        // empty `to`: contract creation
        out.push(EMPTY_STRING_CODE);
        self.value.encode(out);
        self.input.encode(out);
    }

    fn fields_length(&self) -> usize {
        self.nonce.length()
            + self.gas_price.length()
            + self.gas_limit.length()
            + 1
            + self.value.length()
            + self.input.length()
    }
}
