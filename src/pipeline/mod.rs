// Long-running loops wiring the core logic to the bus and collaborators

mod agent;
mod issuer;
mod locker;
mod relay;

pub use agent::PresenceAgent;
pub use issuer::{ControlIssuer, IssueError};
pub use locker::ControlReceiver;
pub use relay::PresenceRelay;
