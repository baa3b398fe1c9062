// Wire types: presence snapshots and control commands
pub mod event;

// Change detection for presence snapshots
pub mod presence;

// Host identity and control command routing
pub mod control;

// NATS JetStream publish/subscribe
pub mod bus;

// Local collaborators: media state reader, session controller
pub mod host;

// Operator notifications
pub mod notify;

// Telegram control bot (inline Lock/Unlock keyboard)
pub mod bot;

// Configuration loading
pub mod config;

// Agent, relay, receiver and issuer loops
pub mod pipeline;
