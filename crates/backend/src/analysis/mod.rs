pub mod comparison;
pub mod source_map;
