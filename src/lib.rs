//! SecureComm - man-in-the-middle interception simulator
//!
//! Shows how an interceptor can capture, decrypt, tamper with and re-forward
//! traffic between two parties, and how transport encryption changes that.
//!
//! - **simulation**: guided single-packet pipeline (client, network, server)
//! - **sandbox**: synthetic traffic generator with brute-force and tamper tools
//! - **ledger**: forensic record of everything the interceptor did
//! - **bridge**: ingestion of real captures (peer store, forward proxy)
//! - **ingress**, **realtime**, **proxy**, **store**: the external surfaces

pub mod bridge;
pub mod codec;
pub mod config;
pub mod console;
pub mod error;
pub mod ingress;
pub mod ledger;
pub mod models;
pub mod proxy;
pub mod realtime;
pub mod report;
pub mod sandbox;
pub mod session;
pub mod simulation;
pub mod store;
pub mod timer;
