// Copyright 2017, Romuald Texier-Marcadé <romualdtm@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! An async dispatch core for Global Caché IR-over-IP gateways (iTach, GC-100,
//! Flex, Global Connect).
//!
//! The crate owns one persistent TCP connection per IR emitter port, speaks the
//! gateways' line-oriented `getversion`/`getdevices`/`sendir`/`stopir` protocol, and
//! turns a RedRat XML key database plus a repeat count or a wall-clock duration into
//! the right chain of `sendir` commands.
//!
//! This is not a port of another implementation; the wire grammar and scheduling
//! math were re-derived from the gateways' documented behavior.
//!
//! # Usage
//!
//! Add a dependency to `globalcache` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! globalcache = "0.1.0"
//! ```
//!
//! # Example
//!
//! ## Press a key for a fixed duration
//!
//! ```rust,no_run
//! use globalcache::Dispatcher;
//!
//! #[tokio::main]
//! async fn main() {
//!     let dispatcher = Dispatcher::new();
//!     dispatcher.add_device("192.168.1.50").await.unwrap();
//!     dispatcher
//!         .load_redrat_ir_dataset(&std::fs::read_to_string("keys.xml").unwrap())
//!         .unwrap();
//!     let (pressed, timing) = dispatcher
//!         .press_key("192.168.1.50", 1, "Living Room TV", "VolumeUp", None, Some(1500))
//!         .await
//!         .unwrap();
//!     println!("sent: {pressed}, timing: {timing:?}");
//! }
//! ```

pub mod config;
pub mod connection;
pub mod dataset;
pub mod dispatcher;
pub mod error;
pub mod policy;
pub mod port;
pub mod protocol;
pub mod scheduler;
pub mod signal;

pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use port::{Device, IrPort};
pub use protocol::CommandTiming;
pub use signal::SignalRecord;
