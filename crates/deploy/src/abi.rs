//! Constructor argument values and their ABI encoding.

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes, U256},
};
use serde::{Deserialize, Serialize};

/// A concrete constructor argument, as passed at deployment time and kept in
/// the deployment record for later verification.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::From, derive_more::Display,
)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ArgValue {
    #[display("{_0}")]
    Address(Address),
    #[display("\"{_0}\"")]
    String(String),
    #[display("{_0}")]
    Uint(U256),
    #[display("{_0}")]
    Bool(bool),
    #[display("{_0}")]
    Bytes(Bytes),
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<&ArgValue> for DynSolValue {
    fn from(value: &ArgValue) -> Self {
        match value {
            ArgValue::Address(address) => DynSolValue::Address(*address),
            ArgValue::String(s) => DynSolValue::String(s.clone()),
            ArgValue::Uint(n) => DynSolValue::Uint(*n, 256),
            ArgValue::Bool(b) => DynSolValue::Bool(*b),
            ArgValue::Bytes(bytes) => DynSolValue::Bytes(bytes.to_vec()),
        }
    }
}

/// ABI-encode constructor arguments as a parameter list.
///
/// This is the blob appended to the creation bytecode and the one block
/// explorers expect as `constructorArguements`.
pub fn encode_constructor_args(args: &[ArgValue]) -> Bytes {
    if args.is_empty() {
        return Bytes::new();
    }

    DynSolValue::Tuple(args.iter().map(DynSolValue::from).collect())
        .abi_encode_params()
        .into()
}

/// Concatenate creation bytecode and encoded constructor arguments.
pub fn creation_code(bytecode: &Bytes, args: &[ArgValue]) -> Bytes {
    let encoded = encode_constructor_args(args);
    let mut code = Vec::with_capacity(bytecode.len() + encoded.len());
    code.extend_from_slice(bytecode);
    code.extend_from_slice(&encoded);
    code.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_args_encode_to_nothing() {
        assert!(encode_constructor_args(&[]).is_empty());
    }

    #[test]
    fn test_address_and_string_layout() {
        let weth = Address::with_last_byte(0x42);
        let encoded = encode_constructor_args(&[weth.into(), "NERO".into()]);

        // head: address word + offset word, tail: length word + padded data word
        assert_eq!(encoded.len(), 4 * 32);
        assert_eq!(&encoded[12..32], weth.as_slice());
        assert_eq!(encoded[63], 0x40, "string offset should point past the head");
        assert_eq!(encoded[95], 4, "string length");
        assert_eq!(&encoded[96..100], b"NERO");
    }

    #[test]
    fn test_three_addresses_are_static_words() {
        let args: Vec<ArgValue> = (1..=3).map(|b| Address::with_last_byte(b).into()).collect();
        let encoded = encode_constructor_args(&args);

        assert_eq!(encoded.len(), 3 * 32);
        assert_eq!(encoded[31], 1);
        assert_eq!(encoded[63], 2);
        assert_eq!(encoded[95], 3);
    }

    #[test]
    fn test_creation_code_appends_args() {
        let bytecode = Bytes::from(vec![0x60, 0x80, 0x60, 0x40]);
        let code = creation_code(&bytecode, &[ArgValue::Bool(true)]);

        assert_eq!(&code[..4], bytecode.as_ref());
        assert_eq!(code.len(), 4 + 32);
        assert_eq!(code[code.len() - 1], 1);
    }

    #[test]
    fn test_arg_value_json_shape() {
        let value = ArgValue::from("NERO");
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "string", "value": "NERO" }));

        let back: ArgValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, value);
    }
}
