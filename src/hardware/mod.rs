//! Connections to the laser servers and their helper processes.

pub mod bridge_process;
pub mod device_session;

pub use bridge_process::BridgeProcess;
pub use device_session::{DeviceSession, Execution, PendingRequest, SessionSettings, START_LINK_OP};
