//! opindex-evm — EVM chain client, `UserOperationEvent` decoder and the
//! indexing pipeline (backfill, live subscription, orchestrator).

pub mod backfill;
pub mod builder;
pub mod client;
pub mod decoder;
pub mod live;
pub mod orchestrator;
pub mod poll;
pub mod rpc;
pub mod transport;
pub mod writer;
pub mod ws;

#[cfg(test)]
mod mock;

pub use backfill::{BackfillReport, BackfillRunner};
pub use builder::IndexerBuilder;
pub use client::{EvmChainClient, EvmClientConfig, EvmClientFactory};
pub use decoder::{user_operation_topic, UserOperationDecoder, USER_OPERATION_EVENT_SIGNATURE};
pub use live::{LiveExit, LiveSubscriber};
pub use orchestrator::Orchestrator;
pub use transport::{HttpTransport, RpcTransport};
pub use writer::SinkWriter;
