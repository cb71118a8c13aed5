pub mod client;
pub mod coordinator;
pub mod domain;
pub mod ports;
pub mod recorder;

pub use client::{ClientConfig, ClientError, ClientSnapshot, SessionClient, SessionView};
pub use coordinator::{CoordinatorError, CoordinatorResult, SessionCommands, SessionCoordinator};
pub use domain::{
    AudioArtifact, DeliveryReceipt, DeviceId, InvalidJoinCode, JoinCode, Role, Session,
    SessionStatus, UnknownStatus,
};
pub use ports::{
    AudioCapture, ChangeFeed, DeliveryService, PortError, PortResult, SessionMatch, SessionPatch,
    SessionStore, SessionStream, Subscription, SubscriptionId,
};
pub use recorder::{RecorderAgent, RecorderOutcome};
