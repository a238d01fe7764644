/*!
 * # `CppEnjoyers` word servers
 *
 * A word server hands out a shared corpus, `K` words per request, in packets
 * of at most `P` comma separated words. Requesters ask for an offset and
 * advance by `K` until they receive the `EOF` sentinel.
 *
 * Uses the log crate to trace connections and requests, to abilitate the
 * logs, simply set the environment variable `RUST_LOG` to the desired level
 * (`info`, `warn`, `error`). Every connection logs under the `conn[<id>]`
 * target and every requester under `client[<id>]`.
 *
 * # Serving modes
 *
 * The server has a single serving path, shared in one of two ways:
 * - contention: requesters race for a [`servers::resource_lock::ResourceLock`],
 *   a claim that finds the path busy is a collision and both the claimant and
 *   the holder receive `HUH!`
 * - scheduling: requests are queued in a [`servers::scheduling::FairScheduler`]
 *   (FIFO or round-robin) and served by one dispatcher
 *
 * # Requester policies
 *
 * In contention mode requesters pick a [`clients::arbiter::ContentionArbiter`]
 * policy:
 * - slotted ALOHA: transmit at slot boundaries with probability `1/n`
 * - binary exponential backoff: transmit at once, wait `[0, 2^a - 1]` slots
 *   after the `a`-th collision
 * - sensing + backoff: ask `BUSY?` first, transmit with backoff when `IDLE`
 *
 * # Wire protocol
 *
 * ``` text
 *     requester -> server: <offset>\n | BUSY?\n
 *     server -> requester: word,word,...\n | $$\n | HUH!\n | BUSY\n | IDLE\n
 * ```
 */

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(nonstandard_style)]
#![warn(missing_docs)]

#[cfg(test)]
mod integration_test;

/// Requester side: retrieval loop, transmission policies and word tallies
pub mod clients;
/// Configuration shared by the binaries
pub mod config;
/// The word list served by the servers
pub mod corpus;
/// Crate error types
pub mod error;
/// Markers and line codecs of the wire protocol
pub mod protocol_utils;
/// Server side: [`WordServer`] and the components it shares between
/// connections
pub mod servers;
/// Line transports over TCP and in-memory channels
pub mod transport;

#[doc(inline)]
pub use clients::{run_clients, Requester, RetrievalReport};
#[doc(inline)]
pub use config::Config;
#[doc(inline)]
pub use corpus::WordCorpus;
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use servers::WordServer;
