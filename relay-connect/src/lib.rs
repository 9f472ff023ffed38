#![cfg_attr(docsrs, feature(doc_cfg))]
//! Wallet provider discovery and session state for BTC relay dapps.
//!
//! Providers are discovered through EIP-6963 announcements, with the page's
//! global EIP-1193 provider as a fallback, and each one is mirrored by a
//! [`ProviderSession`] that tracks its connectivity, chain and accounts.
//!
//! ```ignore
//! let bus = AnnouncementBus::new().with_implicit_provider(global);
//! let registry = ProviderRegistry::new();
//! if let Some(listener) = registry.initialize(&bus) {
//!     tokio::spawn(listener.run());
//! }
//! for session in registry.sessions() {
//!     println!("{}: {:?}", session.info().name, session.chain_name());
//! }
//! ```

pub mod chain;
pub mod config;
pub mod contracts;
pub mod eip1193;
pub mod eip6963;
pub mod error;
pub mod prelude;
pub mod registry;
mod runtime;
pub mod session;
pub mod transport;

pub use eip1193::{EventKind, ProviderEvent, RequestArguments, SharedTransport, Transport};
pub use eip6963::{AnnouncementBus, ProviderDetail, ProviderEnvironment, ProviderInfo};
pub use error::{Error, Result, RpcError};
pub use registry::{AnnouncementListener, DiscoveryMode, ProviderRegistry, RegistryState};
pub use session::{ProviderSession, SessionState};
