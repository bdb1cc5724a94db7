//! # pulse-client
//!
//! Client-side lifecycle manager for analysis-progress streams.
//!
//! A [`ConnectionManager`] follows one document's progress stream at a
//! time and keeps it alive:
//! - **Endpoints**: [`EndpointResolver`] turns the HTTP API base into stream
//!   and restart URLs
//! - **Liveness**: [`HeartbeatMonitor`] probes the server and declares the
//!   link dead after an unanswered timeout
//! - **Reconnect**: [`ReconnectPolicy`] decides between backoff retry and
//!   giving up (terminal close codes, exhausted attempts)
//! - **Delivery**: [`MessageDispatcher`] decodes frames and throttles
//!   progress to the latest event per window
//! - **Restart**: [`RestartController`] asks the backend to rerun a job
//!
//! Results reach the caller through a [`ProgressSubscriber`].

#![deny(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod heartbeat;
pub mod manager;
pub mod policy;
pub mod restart;
pub mod state;
pub mod subscriber;
pub mod transport;

pub use config::ClientConfig;
pub use dispatcher::{MessageDispatcher, Received};
pub use endpoint::{EndpointResolver, derive_stream_base};
pub use heartbeat::{HeartbeatMonitor, HeartbeatResult, Liveness};
pub use manager::ConnectionManager;
pub use policy::{FailureCause, ReconnectDecision, ReconnectPolicy, StopReason};
pub use restart::{RestartAccepted, RestartController};
pub use state::{ConnectionState, ManagerSnapshot};
pub use subscriber::{ChannelSubscriber, FnSubscriber, ProgressSubscriber, SubscriberEvent};
pub use transport::{
    CloseInfo, Connector, OutboundMessage, TransportEvent, TransportLink, WsConnector,
};

pub use pulse_core::{DocumentId, ProgressError, ProgressEvent, ProgressStatus, RawDocumentId};
