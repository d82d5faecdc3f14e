//! Domain and record management on the DNS service.
//!
//! Unlike the compute API, most DNS writes (and even some reads) come
//! back as 202 jobs; every handler method settles those through the
//! dispatcher's job poller before returning.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use strato_client::{Dispatcher, HttpTransport, Outcome, Transport};
use tracing::debug;
use url::Url;

use crate::error::{ResourceError, Result};
use crate::join_path;

const DNS_SERVICE: &str = "cloudDNS";

/// TTL applied to records that do not set one.
pub const DEFAULT_RECORD_TTL: u64 = 300;

/// Interval between job-callback polls.
const JOB_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A hosted zone, as returned by listing or creation.
#[derive(Debug, Clone, Deserialize)]
pub struct Domain {
    pub id: i64,
    pub name: String,
    #[serde(rename = "emailAddress")]
    pub email_address: Option<String>,
}

/// One DNS record. `kind` carries the record type (A, CNAME, MX, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct Record {
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
    pub ttl: Option<u64>,
}

impl Record {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind: kind.into(),
            data: data.into(),
            ttl: None,
        }
    }

    pub fn ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Drop NS records (the service manages those itself) and the
/// server-owned fields, defaulting the TTL, so a record read back from
/// the API can be resubmitted unchanged.
fn sanitize(records: &[Record]) -> Vec<Value> {
    records
        .iter()
        .filter(|record| record.kind != "NS")
        .map(|record| {
            json!({
                "name": record.name,
                "type": record.kind,
                "data": record.data,
                "ttl": record.ttl.unwrap_or(DEFAULT_RECORD_TTL),
            })
        })
        .collect()
}

fn validate(records: &[Record]) -> Result<()> {
    for record in records {
        if record.name.is_empty() {
            return Err(ResourceError::Validation(format!(
                "missing name field in {} record for {}",
                record.kind, record.data
            )));
        }
    }
    Ok(())
}

pub struct DnsHandler<'a, T: Transport = HttpTransport> {
    dispatcher: &'a Dispatcher<T>,
}

impl<'a, T: Transport> DnsHandler<'a, T> {
    pub fn new(dispatcher: &'a Dispatcher<T>) -> Self {
        Self { dispatcher }
    }

    async fn base(&self) -> Result<Url> {
        self.dispatcher
            .endpoints(DNS_SERVICE, None)
            .await?
            .into_iter()
            .map(|(_, url)| url)
            .next()
            .ok_or(ResourceError::NoEndpoint { service: "cloudDNS" })
    }

    /// Resolve an outcome to its body, waiting out a 202 job if the
    /// service chose to answer with one.
    async fn settle(&self, outcome: Outcome) -> Result<Value> {
        match outcome {
            Outcome::Body(body) => Ok(body),
            Outcome::Job(mut job) => {
                debug!(job_id = %job.job_id(), "waiting for DNS job");
                Ok(job.wait_for_result(self.dispatcher, JOB_POLL_INTERVAL).await?)
            }
            Outcome::NoContent => Ok(Value::Null),
        }
    }

    /// All domains on the account.
    pub async fn domains(&self) -> Result<Vec<Domain>> {
        let url = join_path(&self.base().await?, &["domains"])?;
        let outcome = self.dispatcher.get(&url).await?;
        let body = self.settle(outcome).await?;
        parse_domains(&body)
    }

    /// Domains whose name matches `name` (the service treats this as a
    /// substring filter).
    pub async fn find_domains(&self, name: &str) -> Result<Vec<Domain>> {
        let mut url = join_path(&self.base().await?, &["domains"])?;
        url.query_pairs_mut().append_pair("name", name);
        let outcome = self.dispatcher.get(&url).await?;
        let body = self.settle(outcome).await?;
        parse_domains(&body)
    }

    /// Create a domain with its initial record set. NS records are
    /// stripped and missing TTLs defaulted before submission.
    pub async fn create_domain(
        &self,
        name: &str,
        email: &str,
        records: &[Record],
    ) -> Result<Vec<Domain>> {
        validate(records)?;
        let url = join_path(&self.base().await?, &["domains"])?;
        let payload = json!({
            "domains": [{
                "name": name,
                "emailAddress": email,
                "ttl": DEFAULT_RECORD_TTL,
                "recordsList": { "records": sanitize(records) },
            }]
        });
        let outcome = self.dispatcher.post(&url, &payload).await?;
        let body = self.settle(outcome).await?;
        let domains = parse_domains(&body)?;
        debug!(name, "created domain");
        Ok(domains)
    }

    /// Full detail for one domain, including its record list.
    pub async fn details(&self, domain_id: i64) -> Result<Value> {
        let url = join_path(&self.base().await?, &["domains", &domain_id.to_string()])?;
        let outcome = self.dispatcher.get(&url).await?;
        self.settle(outcome).await
    }

    /// The record list from a domain's details.
    pub async fn records(&self, domain_id: i64) -> Result<Vec<Record>> {
        let details = self.details(domain_id).await?;
        let Some(records) = details.pointer("/recordsList/records") else {
            return Ok(Vec::new());
        };
        serde_json::from_value(records.clone())
            .map_err(|e| strato_client::Error::Protocol(e.to_string()).into())
    }

    pub async fn add_record(&self, domain_id: i64, record: &Record) -> Result<()> {
        validate(std::slice::from_ref(record))?;
        let url = join_path(
            &self.base().await?,
            &["domains", &domain_id.to_string(), "records"],
        )?;
        let payload = json!({ "records": sanitize(std::slice::from_ref(record)) });
        let outcome = self.dispatcher.post(&url, &payload).await?;
        self.settle(outcome).await?;
        Ok(())
    }

    pub async fn remove_record(&self, domain_id: i64, record_id: &str) -> Result<()> {
        let url = join_path(
            &self.base().await?,
            &["domains", &domain_id.to_string(), "records", record_id],
        )?;
        let outcome = self.dispatcher.delete(&url).await?;
        self.settle(outcome).await?;
        Ok(())
    }

    pub async fn delete_domain(&self, domain_id: i64) -> Result<()> {
        let url = join_path(&self.base().await?, &["domains", &domain_id.to_string()])?;
        let outcome = self.dispatcher.delete(&url).await?;
        self.settle(outcome).await?;
        Ok(())
    }
}

/// Domain lists arrive either bare or wrapped in a job's `response`
/// envelope; accept both.
fn parse_domains(body: &Value) -> Result<Vec<Domain>> {
    let body = body.get("response").unwrap_or(body);
    let Some(domains) = body.get("domains") else {
        return Ok(Vec::new());
    };
    serde_json::from_value(domains.clone())
        .map_err(|e| strato_client::Error::Protocol(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitize_strips_ns_records_and_defaults_ttl() {
        let records = vec![
            Record::new("example.com", "NS", "ns1.provider.com"),
            Record::new("www.example.com", "A", "10.0.0.1"),
            Record::new("example.com", "MX", "mail.example.com").ttl(3600),
        ];
        let cleaned = sanitize(&records);

        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0]["type"], "A");
        assert_eq!(cleaned[0]["ttl"], 300);
        assert_eq!(cleaned[1]["ttl"], 3600);
        assert!(cleaned[0].get("id").is_none());
    }

    #[test]
    fn sanitize_drops_server_owned_fields() {
        let mut record = Record::new("www.example.com", "A", "10.0.0.1");
        record.id = Some("A-123".into());
        let cleaned = sanitize(std::slice::from_ref(&record));
        assert!(cleaned[0].get("id").is_none());
        assert!(cleaned[0].get("updated").is_none());
        assert!(cleaned[0].get("created").is_none());
    }

    #[test]
    fn validate_requires_a_record_name() {
        let records = vec![Record::new("", "A", "10.0.0.1")];
        let err = validate(&records).unwrap_err();
        assert!(err.to_string().contains("missing name field"));
    }

    #[test]
    fn domains_parse_from_bare_and_job_envelopes() {
        let bare = json!({"domains": [{"id": 1, "name": "a.com"}]});
        assert_eq!(parse_domains(&bare).unwrap()[0].name, "a.com");

        let wrapped = json!({"response": {"domains": [{"id": 2, "name": "b.com"}]}});
        assert_eq!(parse_domains(&wrapped).unwrap()[0].id, 2);

        assert!(parse_domains(&json!({})).unwrap().is_empty());
    }
}
