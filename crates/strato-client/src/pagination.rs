//! Link-based pagination merging.
//!
//! The APIs page large collections by embedding a `links` array with a
//! `rel=next` href in each response. [`fetch_all`] follows those links
//! and folds every page into one logical result: pagination metadata
//! (`links`, `totalEntries`) is stripped, list-valued keys are
//! concatenated in page order, and remaining keys from later pages
//! overwrite earlier ones.

use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::{Map, Value};
use tracing::trace;
use url::Url;

use crate::dispatch::Dispatcher;
use crate::error::{classify, Error, Result};
use crate::transport::{RequestDescriptor, Transport};

/// Metadata keys that describe the paging itself, not the collection
const PAGINATION_KEYS: &[&str] = &["links", "totalEntries"];

/// Fetch every page reachable from `url` and merge them.
pub async fn fetch_all<T: Transport>(
    dispatcher: &Dispatcher<T>,
    url: &Url,
) -> Result<Map<String, Value>> {
    fetch_all_with(dispatcher, url, HeaderMap::new(), None).await
}

/// [`fetch_all`] carrying explicit headers and body to every page
/// request.
pub async fn fetch_all_with<T: Transport>(
    dispatcher: &Dispatcher<T>,
    url: &Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
) -> Result<Map<String, Value>> {
    let mut merged: Option<Map<String, Value>> = None;
    let mut next = Some(url.clone());
    let mut pages = 0usize;

    // Depth is unbounded: one iteration per server-side page.
    while let Some(current) = next {
        let mut descriptor = RequestDescriptor::from_url(Method::GET, &current)?;
        descriptor.headers = headers.clone();
        descriptor.body = body.clone();

        let raw = dispatcher.execute(&descriptor).await?;
        if raw.status != 200 {
            return Err(classify(raw.status, &raw.body));
        }
        let page = match raw.json()? {
            Value::Object(map) => map,
            other => {
                return Err(Error::Protocol(format!(
                    "paginated response is not a JSON object: {other}"
                )))
            }
        };
        pages += 1;

        next = next_link(&page)?;
        merged = Some(match merged {
            None => page,
            Some(acc) => merge_pages(acc, page),
        });
    }

    let mut result = merged.unwrap_or_default();
    strip_pagination_keys(&mut result);
    trace!(url = %url, pages, "merged paginated result");
    Ok(result)
}

/// Merge one page into the accumulated result.
///
/// Earlier pages' items precede later pages' items; non-list keys from
/// the later page win.
fn merge_pages(first: Map<String, Value>, rest: Map<String, Value>) -> Map<String, Value> {
    let mut first = first;
    let mut rest = rest;
    strip_pagination_keys(&mut first);
    strip_pagination_keys(&mut rest);

    let mut result = Map::new();
    for (key, left) in first {
        match rest.remove(&key) {
            Some(right) => match (left, right) {
                (Value::Array(mut items), Value::Array(more)) => {
                    items.extend(more);
                    result.insert(key, Value::Array(items));
                }
                (_, right) => {
                    result.insert(key, right);
                }
            },
            None => {
                result.insert(key, left);
            }
        }
    }
    for (key, value) in rest {
        result.insert(key, value);
    }
    result
}

fn strip_pagination_keys(page: &mut Map<String, Value>) {
    for key in PAGINATION_KEYS {
        page.remove(*key);
    }
}

fn next_link(page: &Map<String, Value>) -> Result<Option<Url>> {
    let Some(links) = page.get("links").and_then(Value::as_array) else {
        return Ok(None);
    };
    for link in links {
        if link.get("rel").and_then(Value::as_str) != Some("next") {
            continue;
        }
        let href = link
            .get("href")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("next link carries no href".into()))?;
        let url = Url::parse(href)
            .map_err(|e| Error::Protocol(format!("invalid next link '{href}': {e}")))?;
        return Ok(Some(url));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{dispatcher, response, ScriptedTransport};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn merge_concatenates_lists_and_drops_pagination_keys() {
        let first = map(json!({
            "records": [1, 2],
            "links": [{"rel": "next", "href": "https://x/page2"}],
            "totalEntries": 3
        }));
        let rest = map(json!({"records": [3], "links": []}));

        let merged = merge_pages(first, rest);
        assert_eq!(Value::Object(merged), json!({"records": [1, 2, 3]}));
    }

    #[test]
    fn merge_passes_remainder_only_keys_through_and_overwrites_scalars() {
        let first = map(json!({"domains": [{"id": 1}], "count": 1}));
        let rest = map(json!({"domains": [{"id": 2}], "count": 2, "extra": "later"}));

        let merged = merge_pages(first, rest);
        assert_eq!(
            Value::Object(merged),
            json!({"domains": [{"id": 1}, {"id": 2}], "count": 2, "extra": "later"})
        );
    }

    #[test]
    fn next_link_ignores_other_rels() {
        let page = map(json!({
            "links": [
                {"rel": "self", "href": "https://x/page1"},
                {"rel": "next", "href": "https://x/page2"}
            ]
        }));
        let url = next_link(&page).unwrap().unwrap();
        assert_eq!(url.as_str(), "https://x/page2");

        let no_next = map(json!({"links": [{"rel": "self", "href": "https://x/p"}]}));
        assert!(next_link(&no_next).unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_all_follows_next_links_in_order() {
        let transport = ScriptedTransport::new(vec![
            Ok(response(
                200,
                &json!({
                    "records": [1, 2],
                    "totalEntries": 3,
                    "links": [{"rel": "next", "href": "https://lb.example.com/v1/loadbalancers?page=2"}]
                })
                .to_string(),
            )),
            Ok(response(200, &json!({"records": [3], "links": []}).to_string())),
        ]);
        let dispatcher = dispatcher(&transport);
        let url = Url::parse("https://lb.example.com/v1/loadbalancers").unwrap();

        let merged = fetch_all(&dispatcher, &url).await.unwrap();
        assert_eq!(Value::Object(merged), json!({"records": [1, 2, 3]}));

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].path, "/v1/loadbalancers?page=2");
    }

    #[tokio::test]
    async fn fetch_all_single_page_strips_pagination_metadata() {
        let transport = ScriptedTransport::new(vec![Ok(response(
            200,
            &json!({"flavors": [{"id": 1}], "links": [], "totalEntries": 1}).to_string(),
        ))]);
        let dispatcher = dispatcher(&transport);
        let url = Url::parse("https://compute.example.com/v2/1/flavors").unwrap();

        let merged = fetch_all(&dispatcher, &url).await.unwrap();
        assert_eq!(Value::Object(merged), json!({"flavors": [{"id": 1}]}));
    }

    #[tokio::test]
    async fn fetch_all_classifies_non_200_pages() {
        let transport = ScriptedTransport::new(vec![Ok(response(
            409,
            r#"{"code": 409, "message": "busy"}"#,
        ))]);
        let dispatcher = dispatcher(&transport);
        let url = Url::parse("https://lb.example.com/v1/loadbalancers").unwrap();

        let err = fetch_all(&dispatcher, &url).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateObject { .. }));
    }

    #[tokio::test]
    async fn fetch_all_carries_headers_to_every_page() {
        use reqwest::header::{HeaderName, HeaderValue};

        let transport = ScriptedTransport::new(vec![
            Ok(response(
                200,
                &json!({
                    "records": [],
                    "links": [{"rel": "next", "href": "https://x.example.com/p2"}]
                })
                .to_string(),
            )),
            Ok(response(200, "{}")),
        ]);
        let dispatcher = dispatcher(&transport);

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-request-source"),
            HeaderValue::from_static("listing"),
        );
        let url = Url::parse("https://x.example.com/p1").unwrap();
        fetch_all_with(&dispatcher, &url, headers, None).await.unwrap();

        for request in transport.requests() {
            assert_eq!(request.headers.get("x-request-source").unwrap(), "listing");
        }
    }
}
