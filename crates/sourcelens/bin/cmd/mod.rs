pub mod compare;
pub mod decode;
pub mod disasm;
pub mod lookup;
pub mod verify;
