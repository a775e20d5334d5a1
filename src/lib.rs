//! Core connection, reconnect and pub/sub restoration engine for an
//! asynchronous RESP client.
//!
//! This crate owns the hard part of talking to one Redis-compatible
//! server: the wire codec, the in-flight command queue, the reconnect
//! watchdog, and the session restoration sequence that replays `AUTH`,
//! `SELECT` and subscriptions after a channel is re-established. Building
//! individual command argument vectors, cluster topology discovery,
//! connection pooling and Sentinel failover are left to layers above this
//! one; see [`cmd::Cmd`] for the seam they plug into.
//!
//! ```no_run
//! use redis_core::{cmd, config::EndpointConfig, endpoint::Endpoint, resources::ClientResources};
//!
//! # async fn example() -> redis_core::error::RedisResult<()> {
//! let resources = ClientResources::current();
//! let endpoint = Endpoint::connect("redis://127.0.0.1/0", EndpointConfig::default(), resources).await?;
//! let reply = endpoint.write(cmd::cmd("PING"))?
//!     .await_result(std::time::Duration::from_secs(5))
//!     .await?;
//! assert_eq!(reply, redis_core::value::Value::Status("PONG".into()));
//! # Ok(())
//! # }
//! ```
//!
//! `cmd` above is the module (`redis_core::cmd`); its free function
//! `redis_core::cmd::cmd` builds a [`cmd::Cmd`].

pub mod cmd;
pub mod command;
pub mod config;
pub mod connection_info;
pub mod endpoint;
pub mod error;
pub mod events;
mod handler;
mod lifecycle;
pub mod parser;
pub mod pubsub;
mod restore;
pub mod resources;
pub mod transport;
pub mod value;
mod watchdog;

pub use cmd::Cmd;
pub use command::Command;
pub use config::EndpointConfig;
pub use endpoint::Endpoint;
pub use error::{ErrorKind, RedisError, RedisResult};
pub use lifecycle::LifecycleState;
pub use resources::ClientResources;
pub use value::{FromValue, Value};
pub use watchdog::WatchdogControl;
