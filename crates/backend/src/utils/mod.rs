pub mod compilation;
pub mod opcode;

/// Trims whitespace and an optional `0x`/`0X` prefix off a hex string.
pub fn normalize_hex(input: &str) -> &str {
    let input = input.trim();
    input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")).unwrap_or(input)
}

/// Decodes a hex string after [`normalize_hex`]. Case-insensitive.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, String> {
    hex::decode(normalize_hex(input)).map_err(|e| e.to_string())
}
