//! # strato-client
//!
//! Resilient request layer for a multi-region cloud-infrastructure
//! API. The crate owns the part of a client with real failure-handling
//! logic; resource wrappers (servers, images, DNS, load balancers,
//! volumes) are thin CRUD mappings layered on top in `strato-resources`.
//!
//! What lives here:
//!
//! - [`Session`] — token, service catalog, and the login exchange
//! - [`Dispatcher`] — one logical HTTP call with bounded retry on
//!   transient transport faults and a single transparent re-login on
//!   token expiry
//! - [`Error`] — the classified error taxonomy; every HTTP-derived
//!   variant keeps the original status and raw body
//! - [`AsyncJob`] — polling state machine for 202-style operations
//! - [`pagination`] — link-following page merging
//!
//! ## Example
//!
//! ```rust,no_run
//! use strato_client::{Credentials, Dispatcher};
//! use url::Url;
//!
//! # async fn run() -> strato_client::Result<()> {
//! let dispatcher = Dispatcher::connect(Credentials {
//!     username: "user".into(),
//!     api_key: "secret".into(),
//!     auth_url: Url::parse("https://auth.example.com/v1.1/auth").unwrap(),
//! })
//! .await?;
//!
//! let endpoints = dispatcher.endpoints("cloudServersOpenStack", Some("ORD")).await?;
//! for (region, url) in endpoints {
//!     println!("{region:?}: {url}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! The dispatcher is built for one logical caller at a time; embedders
//! wanting parallelism run independent dispatchers per worker. Shared
//! mutable state is confined to the session (behind a mutex) and the
//! transport's connection cache.

pub mod dispatch;
pub mod error;
pub mod job;
pub mod pagination;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{Dispatcher, DispatcherBuilder, Outcome, MAX_TRANSPORT_ATTEMPTS};
pub use error::{classify, classify_bad_request, classify_job_detail, Error, Result};
pub use job::{AsyncJob, JobState};
pub use pagination::{fetch_all, fetch_all_with};
pub use session::{CatalogEndpoint, Credentials, ServiceCatalog, Session};
pub use transport::{
    ConnectionKey, HttpTransport, RawResponse, RequestDescriptor, Scheme, ServiceFamily,
    Transport, TransportError,
};
