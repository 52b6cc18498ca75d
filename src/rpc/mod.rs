pub mod client;

pub use client::{with_retry, CometClient, RetryConfig, RpcError};
