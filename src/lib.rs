//! One-shot mDNS / DNS-SD resolver library
//!
//! This library discovers services and hosts on the local network with single
//! multicast DNS queries. It uses asynchronous Rust and depends on Tokio.
//! Main parts of the api:
//! - [Resolver](resolver::Resolver) - The resolution operations. Each call sends one query from an
//!                       ephemeral unicast socket, listens on that socket and a multicast-joined
//!                       socket for a bounded window and returns the parsed result. Cycles from
//!                       concurrent calls own their own sockets and never share state.
//! - [protocol](protocol) - DNS wire format: query encoding, response decoding with
//!                       name-compression support and the typed A/PTR/SRV/TXT payloads.
//! - [collate](collate) - Folding of raw record batches into a per-name
//!                       [ServiceEntry](collate::ServiceEntry) view (ip, port, TXT info,
//!                       instances, service types, hostnames).
//!
//! Example listing the service types announced on the local network:
//! ```no_run
//! # use anyhow::Result;
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let resolver = mdnsq::resolver::Resolver::new();
//! for service_type in resolver.get_service_types().await? {
//!     println!("{}", service_type);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Example resolving a service instance to its address and port:
//! ```no_run
//! # use anyhow::Result;
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let resolver = mdnsq::resolver::Resolver::new();
//! let (ip, port) = resolver.get_address("Printer._http._tcp.local").await?;
//! if let (Some(ip), Some(port)) = (ip, port) {
//!     println!("{}:{}", ip, port);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The demos directory contains standalone examples on how to use the APIs.
//!
#![doc = include_str!("../readme.md")]

pub mod collate;
mod collector;
pub mod protocol;
pub mod resolver;
mod sockets;
