pub mod check;
pub mod export;
pub mod init;
pub mod probe;
pub mod validate;
