pub(crate) mod clean;
pub(crate) mod config;
pub(crate) mod fetch;
pub(crate) mod init;
