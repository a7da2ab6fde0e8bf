//! Outbound gateway connections: credentials, TLS dialing, the per-app
//! registry of live sessions, and the background reader of each session.

pub mod backoff;
pub mod connector;
pub mod credentials;
pub mod reader;
pub mod registry;
pub mod session;

pub use backoff::ReconnectBackoff;
pub use connector::{ConnectError, GatewayConnector, Service, TlsGatewayConnector};
pub use credentials::{CredentialError, CredentialSource, Credentials, FsCredentials};
pub use reader::{spawn_reader, ConnectionLost, LostReason};
pub use registry::{ConnectionInfo, ConnectionRegistry, LinkState};
pub use session::Session;

use tokio::io::{AsyncRead, AsyncWrite};

/// Any duplex byte stream to the gateway (TLS in production, in-memory
/// pipes in tests).
pub trait GatewayIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> GatewayIo for T {}

pub type GatewayStream = Box<dyn GatewayIo>;
