//! Shared test infrastructure.
//!
//! - `TestNats`: NATS container with JetStream and automatic cleanup (feature: "nats")
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["nats"] }
//! ```
//!
//! ```rust,ignore
//! use test_utils::TestNats;
//!
//! #[tokio::test]
//! #[ignore = "requires docker"]
//! async fn my_jetstream_test() {
//!     let nats = TestNats::new().await;
//!     nats.create_stream("ORDERS", &["orders.>"]).await;
//!     nats.publish("orders.created", r#"{"id":1}"#).await;
//! }
//! ```

#[cfg(feature = "nats")]
mod nats;

#[cfg(feature = "nats")]
pub use nats::TestNats;
