//! Typed resource wrappers over [`strato_client`].
//!
//! Each module holds a handler struct borrowing a
//! [`Dispatcher`](strato_client::Dispatcher); the handler resolves the
//! right service-catalog endpoints, builds request payloads, and parses
//! the envelope the API wraps each resource in. All retry, token
//! refresh, job polling, and pagination behavior lives in the
//! dispatcher underneath.
//!
//! ```rust,no_run
//! use strato_client::{Credentials, Dispatcher};
//! use strato_resources::servers::{ServerFilter, ServerHandler};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Dispatcher::connect(Credentials {
//!     username: "acct".into(),
//!     api_key: "key".into(),
//!     auth_url: url::Url::parse("https://identity.example.com/v1.1/auth")?,
//! })
//! .await?;
//!
//! let servers = ServerHandler::new(&dispatcher)
//!     .list(&ServerFilter::default().region("ORD"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod dns;
pub mod error;
pub mod flavors;
pub mod images;
pub mod load_balancers;
pub mod servers;
pub mod volumes;

pub use error::{ResourceError, Result};

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use url::Url;

/// Catalog entries that serve the compute API, in lookup order.
pub(crate) const COMPUTE_SERVICES: &[&str] = &["cloudServersOpenStack", "cloudServers"];

/// Append path segments to a catalog base URL, keeping its query intact.
pub(crate) fn join_path(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| {
            ResourceError::Client(strato_client::Error::Protocol(format!(
                "endpoint URL {base} cannot carry a path"
            )))
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Resource ids arrive as JSON numbers on the legacy API and as string
/// UUIDs on the OpenStack one; normalize both to a string.
pub(crate) fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number id, got {other}"
        ))),
    }
}

/// A `rel`/`href` pair from a resource's `links` array.
#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

/// The `rel == "self"` link, parsed, when one is present.
pub(crate) fn self_link(links: &[Link]) -> Option<Url> {
    links
        .iter()
        .find(|link| link.rel == "self")
        .and_then(|link| Url::parse(&link.href).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn join_path_extends_without_clobbering_base() {
        let base = Url::parse("https://ord.servers.example.com/v2/900001").unwrap();
        let url = join_path(&base, &["servers", "detail"]).unwrap();
        assert_eq!(url.as_str(), "https://ord.servers.example.com/v2/900001/servers/detail");
    }

    #[test]
    fn join_path_tolerates_trailing_slash() {
        let base = Url::parse("https://dns.example.com/v1.0/900001/").unwrap();
        let url = join_path(&base, &["domains"]).unwrap();
        assert_eq!(url.as_str(), "https://dns.example.com/v1.0/900001/domains");
    }

    #[test]
    fn lenient_id_accepts_numbers_and_strings() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(deserialize_with = "lenient_id")]
            id: String,
        }

        let numeric: Holder = serde_json::from_value(serde_json::json!({"id": 110917})).unwrap();
        assert_eq!(numeric.id, "110917");
        let uuid: Holder = serde_json::from_value(serde_json::json!({"id": "ab-12"})).unwrap();
        assert_eq!(uuid.id, "ab-12");
    }

    #[test]
    fn self_link_picks_the_self_rel() {
        let links = vec![
            Link { rel: "bookmark".into(), href: "https://a/b".into() },
            Link { rel: "self".into(), href: "https://a/self".into() },
        ];
        assert_eq!(self_link(&links).unwrap().as_str(), "https://a/self");
    }
}
