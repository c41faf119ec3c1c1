//! wxoa core library: official-account credentials, the webhook message gateway, and the
//! platform API client used by the CLI.

pub mod accounts;
pub mod config;
pub mod gateway;
pub mod init;
pub mod wechat;
