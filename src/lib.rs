// Copyright 2026 The logix Authors. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! This crate provides communication tools for Allen-Bradley / Rockwell
//! ControlLogix, CompactLogix and Micro800 PLC devices over EtherNet/IP.
//! # Examples
//! ```no_run
//! # extern crate logix;
//! # use logix::{client::Client, eip, value::PlcValue};
//! # use std::time::Duration;
//! # use std::net::{Ipv4Addr, IpAddr};
//!
//! # fn main() {
//!     let addr = Ipv4Addr::new(192, 168, 1, 10);
//!     let mut opts = eip::Options::new(IpAddr::from(addr), 0);
//!     opts.read_timeout = Duration::from_secs(2);
//!     opts.write_timeout = Duration::from_secs(2);
//!     let mut cl = match Client::connect(opts) {
//!         Ok(cl) => cl,
//!         Err(e) => {
//!             println!("{:?}", e.to_string());
//!             return;
//!         }
//!     };
//!
//!     for value in cl.read(&["Counter", "Vec", "Motor1"]).unwrap() {
//!         match &value.error {
//!             None => println!("{} = {:?}", value.name, cl.decode(&value)),
//!             Some(e) => println!("{} failed: {}", value.name, e),
//!         }
//!     }
//!
//!     cl.write("Counter", PlcValue::Dint(42)).unwrap();
//!     cl.close();
//! # }
//! ```
pub mod cip;
pub mod client;
pub mod connection;
pub mod constant;
pub mod cpf;
pub mod eip;
pub mod epath;
pub mod error;
pub mod symbols;
pub mod template;
pub mod transport;
pub mod value;
