pub mod bytes;
pub mod encoding;
pub mod hash;
pub mod i256;
pub mod lockup;
pub mod u256;
