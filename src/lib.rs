//! # wamp-callee
//!
//! Callee-side runtime for the WAMP v2 RPC protocol.
//!
//! A callee exposes procedures on a router, receives INVOCATIONs for them,
//! runs them (synchronously or as tokio tasks) and sends back YIELD or ERROR,
//! all multiplexed over one RawSocket connection.
//!
//! ## Architecture
//!
//! - **Callee core** ([`callee`]): correlation of REGISTER/UNREGISTER with
//!   their acks, the registration registry, the tracker of cancellable
//!   invocations, and one cleanup path for connection loss
//! - **Operations** ([`handler`]): closures bound to a procedure URI and a
//!   declared parameter shape
//! - **Transport** ([`client`], [`protocol`], [`writer`]): RawSocket
//!   handshake and framing, HELLO/WELCOME, a read loop feeding the callee
//!
//! ## Example
//!
//! ```ignore
//! use wamp_callee::handler::{ParamType, SyncOperation};
//! use wamp_callee::protocol::RegisterOptions;
//! use wamp_callee::ClientBuilder;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new("realm1")
//!         .connect_tcp("127.0.0.1:8080")
//!         .await?;
//!
//!     let add = SyncOperation::new("com.example.add", |args| {
//!         Ok(json!(args.get::<i64>(0)? + args.get::<i64>(1)?))
//!     })
//!     .param("a", ParamType::Integer)
//!     .param("b", ParamType::Integer);
//!
//!     let registration = client.register(add, RegisterOptions::default())?.await?;
//!     client.wait_for_shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod callee;
pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod session;
pub mod uri;
pub mod writer;

mod client;

pub use callee::{Callee, CalleeConfig, PendingResponse, Registration, ServerProxy};
pub use client::{Client, ClientBuilder, CLOSE_NORMAL, GOODBYE_AND_OUT};
pub use error::{CalleeError, CloseInfo, ConnectionLoss, WampError};
pub use handler::{AsyncOperation, CallArgs, InvocationCallback, RpcOperation, SyncOperation};
pub use session::{ConnectionListener, ConnectionMonitor};
