//! Add Callee - registers two procedures on a router.
//!
//! This demo shows:
//! - Joining a realm over RawSocket TCP
//! - A synchronous operation with declared parameters
//! - An asynchronous operation that honours INTERRUPT
//!
//! # Running
//!
//! Start any WAMP router with a RawSocket transport (e.g. Crossbar.io or
//! Nexus on port 8080), then:
//!
//! ```text
//! RUST_LOG=wamp_callee=debug cargo run --example add_callee -- 127.0.0.1:8080 realm1
//! ```
//!
//! Call `com.example.add` with `[2, 3]` from any caller to get `5`.

use std::time::Duration;

use serde_json::json;
use tracing_subscriber::EnvFilter;
use wamp_callee::handler::{AsyncOperation, ParamType, SyncOperation};
use wamp_callee::protocol::RegisterOptions;
use wamp_callee::{ClientBuilder, WampError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:8080".to_owned());
    let realm = args.next().unwrap_or_else(|| "realm1".to_owned());

    let client = ClientBuilder::new(realm).connect_tcp(addr).await?;
    tracing::info!(session_id = client.session_id(), "Joined");

    let add = SyncOperation::new("com.example.add", |args| {
        let a: i64 = args.get_named("a")?;
        let b: i64 = args.get_named("b")?;
        let sum = a
            .checked_add(b)
            .ok_or_else(|| WampError::new("com.example.error.overflow"))?;
        Ok(json!(sum))
    })
    .param("a", ParamType::Integer)
    .param("b", ParamType::Integer);

    let sleep = AsyncOperation::new("com.example.sleep", |args, token| async move {
        let seconds: u64 = args.get(0)?;
        tokio::select! {
            _ = token.cancelled() => Err(WampError::new("com.example.error.interrupted").into()),
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => Ok(json!(seconds)),
        }
    })
    .param("seconds", ParamType::Integer);

    let add = client.register(add, RegisterOptions::default())?.await?;
    let sleep = client.register(sleep, RegisterOptions::default())?.await?;
    tracing::info!(add = add.id(), sleep = sleep.id(), "Registered");

    client.wait_for_shutdown().await?;
    Ok(())
}
