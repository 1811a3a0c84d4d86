//! The on-air host.
//!
//! Speaks a scripted monologue on the broadcast room and, when a listener's
//! dialogue request reaches the head of the queue, hands the air to a live
//! realtime conversation with that listener.

pub mod gateway_client;
pub mod mode;
pub mod monologue;
pub mod poller;
pub mod server;
pub mod supervisor;

pub use gateway_client::{GatewayLink, HttpGatewayLink};
pub use mode::{DialogueStatus, LeaveReason, ModeController};
pub use monologue::{Monologue, PromptBoard, Speaker};
pub use poller::QueuePoller;
pub use server::{HostState, router, start_host};
pub use supervisor::MediaSupervisor;
