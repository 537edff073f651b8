//! # Sketch Session Engine
//!
//! This library runs live drawing-and-guessing games. Each game is a
//! session: a handful of participants take turns drawing a secret word
//! while everyone else races to guess it, for a fixed number of rounds.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Game Flow
//! The session decides who draws, which words are offered, when a turn or
//! round ends and how many points a guess is worth. Clients only send
//! intents and render whatever the session broadcasts.
//!
//! ### Pacing
//! Every phase is driven by a cancellable one-second countdown: the host's
//! pre-game countdown, the drawer's word selection and the drawing phase.
//! Each tick is broadcast, and drawing ticks progressively reveal letters.
//!
//! ### Participant Lifecycle
//! Handles the complete life of a participant including:
//! - Joining while the game has not started, up to the seat limit
//! - Temporary disconnects with a grace period to come back
//! - Host removal, which is permanent
//!
//! ## Architecture Design
//!
//! ### Single-Writer Event Loop
//! Each session owns one task that applies every state change in order.
//! Timers, grace periods and flow transitions post signals to that task
//! instead of touching state themselves, which rules out lost updates and
//! keeps a stale timer from affecting a newer phase.
//!
//! ### Non-Blocking Delivery
//! Outbound messages are JSON `{type, payload}` envelopes handed to a
//! `Messenger`. The built-in `Hub` gives every participant a bounded queue
//! and drops a participant whose queue overflows, so a slow client can never
//! stall the loop.
//!
//! ## Module Organization
//!
//! - `session`: the loop, its inputs and the `SessionHandle` callers use
//! - `flow`: rounds, turns, word selection and timer outcomes
//! - `connection`: join, disconnect, grace period, reconnect and removal
//! - `events`: decoding inbound messages and dispatching them
//! - `game`, `round`, `turn`: the session's state
//! - `guess`: guess evaluation and scoring
//! - `timer`: countdowns and the per-session timer set
//! - `network`: the `Messenger` and `Connection` seams and the `Hub`
//! - `words`: word sources
//! - `registry`: sessions by id and idle reaping
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{ConnectionRef, SessionConfig, SessionRegistry, StaticWordStore};
//! use shared::{ClientMessage, TimerKind};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = SessionRegistry::new(Arc::new(StaticWordStore::builtin()));
//!     let (session, hub) = registry.create("room-1", SessionConfig::default())?;
//!
//!     // Each participant gets an outbound queue and a connection handle
//!     let (ann, mut ann_rx) = hub.attach("ann");
//!     session.join("ann", "Ann", ConnectionRef::new(&ann)).await?;
//!     let (bob, _bob_rx) = hub.attach("bob");
//!     session.join("bob", "Bob", ConnectionRef::new(&bob)).await?;
//!
//!     // The first participant is host and may start the game
//!     session
//!         .send("ann", ClientMessage::start_timer(TimerKind::GameStart))
//!         .await?;
//!
//!     while let Some(bytes) = ann_rx.recv().await {
//!         println!("{}", String::from_utf8_lossy(&bytes));
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod flow;
pub mod game;
pub mod guess;
pub mod network;
pub mod registry;
pub mod round;
pub mod session;
pub mod timer;
pub mod turn;
pub mod words;

pub use config::SessionConfig;
pub use error::{ConfigError, EventError, SessionError, WordStoreError};
pub use events::EventRegistry;
pub use flow::FlowEvent;
pub use network::{Connection, ConnectionRef, Hub, HubConnection, Messenger};
pub use registry::{Lifecycle, SessionRegistry};
pub use session::{input_channel, Session, SessionHandle, SessionInput};
pub use words::{StaticWordStore, WordStore};
