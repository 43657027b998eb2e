//! HUB Service - Cache-Aside Coordination
//!
//! Keeps a [`hub_storage::DurableStore`] and a [`hub_storage::Cache`]
//! consistent while serving point reads, relation lists, filtered lists and
//! per-user dashboards over one single-table layout.
//!
//! ```ignore
//! let hub = MemoryHub::in_memory(HubConfig::from_env())?;
//! let ctx = OpContext::with_timeout(Duration::from_secs(2));
//! let user = hub.users().register(&ctx, "ada@example.com", "Ada", "Lovelace").await?;
//! let contact = Contact::new(&user.id, "Charles Babbage", "cb@example.com");
//! hub.contacts().create(&ctx, &contact).await?;
//! let favorites = hub.contacts().favorites(&ctx, &user.id).await?;
//! ```

pub mod coordinator;
pub mod dashboard;
pub mod hub;
pub mod services;
pub mod telemetry;

pub use coordinator::CacheAsideCoordinator;
pub use dashboard::UserDashboard;
pub use hub::{Hub, LmdbHub, MemoryHub};
pub use services::{ContactService, UserService};
pub use telemetry::{init_tracing, TelemetryConfig, DEFAULT_FILTER};
