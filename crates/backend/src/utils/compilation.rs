use alloy_primitives::Address;

use crate::{artifact::BytecodeOutput, utils::normalize_hex};

/// Returns the hex object of `bytecode` with every library placeholder replaced by `addr`, or
/// the zero address. Placeholders are located through the link references, so both the
/// `__$hash$__` and the legacy `__Name___` forms are covered.
#[inline]
pub fn link_contracts_fakely(bytecode: &BytecodeOutput, addr: Option<Address>) -> String {
    let addr = hex::encode(addr.unwrap_or_default());
    let mut object = normalize_hex(&bytecode.object).to_string();

    let offsets = bytecode.link_references.values().flat_map(|libraries| libraries.values());
    for offset in offsets.flatten() {
        let range = offset.start * 2..(offset.start + offset.length) * 2;
        if range.end > object.len() ||
            !object.is_char_boundary(range.start) ||
            !object.is_char_boundary(range.end)
        {
            warn!(start = offset.start, length = offset.length, "link reference out of bounds");
            continue;
        }

        let replacement: String = addr.chars().cycle().take(range.len()).collect();
        object.replace_range(range, &replacement);
    }

    object
}
