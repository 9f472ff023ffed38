pub use crate::config::{DeploymentConfig, Network};
pub use crate::contracts::{RelayReader, RelayStatus};
pub use crate::eip1193::{EventKind, RequestArguments, SharedTransport, Transport};
pub use crate::eip6963::{AnnouncementBus, ProviderDetail, ProviderEnvironment, ProviderInfo};
pub use crate::registry::{DiscoveryMode, ProviderRegistry};
pub use crate::session::{ProviderSession, SessionState};
pub use crate::transport::{HttpProvider, MemoryProvider};
