pub mod cmd;
pub mod error;
pub mod grub;
pub mod manifest;
pub mod paths;
pub mod profile;
pub mod storage;
pub mod util;
