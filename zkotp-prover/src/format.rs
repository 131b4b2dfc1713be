//! Caller-facing proof formatting.

use zkotp_common::{FieldElement, ZkOtpError};

const BYTES32: usize = 32;

pub fn proof_hex(proof: &[u8]) -> String {
    format!("0x{}", hex::encode(proof))
}

/// Public inputs as `bytes32` hex strings.
pub fn public_inputs_hex(inputs: &[FieldElement]) -> Vec<String> {
    inputs.iter().map(FieldElement::to_bytes32_hex).collect()
}

/// Left-pad a hex value to 32 bytes.
pub fn to_bytes32(value: &str) -> Result<String, ZkOtpError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if digits.len() > BYTES32 * 2 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ZkOtpError::Input(format!(
            "'{value}' is not a hex value of at most 32 bytes"
        )));
    }
    Ok(format!("0x{:0>64}", digits.to_ascii_lowercase()))
}

/// Split bytes into 32-byte `0x` segments. The final segment keeps its length.
pub fn to_bytes32_array(bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(BYTES32)
        .map(|chunk| format!("0x{}", hex::encode(chunk)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_hex_is_prefixed() {
        assert_eq!(proof_hex(&[0xde, 0xad]), "0xdead");
        assert_eq!(proof_hex(&[]), "0x");
    }

    #[test]
    fn bytes32_left_pads() {
        assert_eq!(to_bytes32("0xABC").unwrap(), format!("0x{}abc", "0".repeat(61)));
        assert_eq!(to_bytes32("1").unwrap(), format!("0x{}1", "0".repeat(63)));
        assert!(to_bytes32(&format!("0x{}", "1".repeat(65))).is_err());
        assert!(to_bytes32("0xzz").is_err());
    }

    #[test]
    fn array_chunks_without_padding_the_tail() {
        let bytes: Vec<u8> = (0..70).collect();
        let chunks = to_bytes32_array(&bytes);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 2 + 64);
        assert_eq!(chunks[2], "0x4445");
        assert!(to_bytes32_array(&[]).is_empty());
    }

    #[test]
    fn public_inputs_are_bytes32() {
        let hex = public_inputs_hex(&[FieldElement::from(255)]);
        assert_eq!(hex, vec![format!("0x{}ff", "0".repeat(62))]);
    }
}
