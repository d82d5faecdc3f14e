//! Load balancers: creation with node validation, node management, and
//! readiness waits.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use strato_client::{Dispatcher, HttpTransport, Transport};
use tracing::debug;
use url::Url;

use crate::error::{ResourceError, Result};
use crate::join_path;

const LOAD_BALANCER_SERVICE: &str = "cloudLoadBalancers";

/// Protocols the service accepts, with the default port each implies.
pub const VALID_PROTOCOLS: &[(&str, u16)] = &[
    ("DNS_TCP", 53),
    ("DNS_UDP", 53),
    ("FTP", 21),
    ("HTTP", 80),
    ("HTTPS", 443),
    ("IMAPS", 993),
    ("IMAPv4", 143),
    ("LDAP", 389),
    ("LDAPS", 636),
    ("MYSQL", 3306),
    ("POP3", 110),
    ("POP3S", 995),
    ("SMTP", 25),
    ("TCP", 0),
    ("TCP_CLIENT_FIRST", 0),
    ("UDP", 0),
    ("UDP_STREAM", 0),
    ("SFTP", 22),
];

pub const ALLOWED_ALGORITHMS: &[&str] = &[
    "RANDOM",
    "WEIGHTED_LEAST_CONNECTIONS",
    "WEIGHTED_ROUND_ROBIN",
];

const VALID_NODE_CONDITIONS: &[&str] = &["ENABLED", "DISABLED", "DRAINING"];
const VALID_NODE_TYPES: &[&str] = &["PRIMARY", "SECONDARY"];

/// Statuses during which the balancer rejects further mutation.
const BUSY_STATUSES: &[&str] = &["PENDING_UPDATE", "BUILD"];

fn protocol_entry(protocol: &str) -> Option<(&'static str, u16)> {
    VALID_PROTOCOLS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(protocol))
        .copied()
}

#[derive(Debug, Clone, Deserialize)]
pub struct VirtualIp {
    pub id: Option<i64>,
    pub address: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(rename = "ipVersion")]
    pub ip_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadBalancer {
    pub id: i64,
    pub name: Option<String>,
    pub protocol: Option<String>,
    pub port: Option<u16>,
    pub algorithm: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeDetail>,
    #[serde(rename = "virtualIps", default)]
    pub virtual_ips: Vec<VirtualIp>,
}

impl LoadBalancer {
    /// True while the service is still converging this balancer.
    pub fn is_busy(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| BUSY_STATUSES.contains(&status))
    }
}

/// A backend node as the API reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDetail {
    pub id: Option<i64>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub condition: Option<String>,
    pub status: Option<String>,
    pub weight: Option<u32>,
}

/// A backend node being submitted. Defaults to PRIMARY and ENABLED.
#[derive(Debug, Clone)]
pub struct Node {
    address: String,
    port: u16,
    kind: String,
    condition: String,
    weight: Option<u32>,
}

impl Node {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            kind: "PRIMARY".into(),
            condition: "ENABLED".into(),
            weight: None,
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    /// Only honored under a weighted algorithm; must be 1 through 100.
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    fn validate(&self, weighted: bool) -> Result<()> {
        if !VALID_NODE_TYPES.contains(&self.kind.as_str()) {
            return Err(ResourceError::Validation(format!(
                "invalid node type: {}",
                self.kind
            )));
        }
        if !VALID_NODE_CONDITIONS.contains(&self.condition.as_str()) {
            return Err(ResourceError::Validation(format!(
                "invalid node condition: {}",
                self.condition
            )));
        }
        if let Some(weight) = self.weight {
            if !weighted {
                return Err(ResourceError::Validation(
                    "node weight requires a weighted algorithm".into(),
                ));
            }
            if !(1..=100).contains(&weight) {
                return Err(ResourceError::Validation(format!(
                    "invalid node weight: {weight}"
                )));
            }
        }
        Ok(())
    }

    fn to_body(&self) -> Value {
        let mut body = json!({
            "address": self.address,
            "port": self.port,
            "type": self.kind,
            "condition": self.condition,
        });
        if let Some(weight) = self.weight {
            body["weight"] = json!(weight);
        }
        body
    }
}

/// Parameters for creating a load balancer. The protocol must come
/// from [`VALID_PROTOCOLS`]; when no port is given the protocol's
/// default is used. At least one node is required.
#[derive(Debug, Clone)]
pub struct CreateLoadBalancerRequest {
    name: String,
    protocol: String,
    port: Option<u16>,
    algorithm: Option<String>,
    nodes: Vec<Node>,
    public: bool,
}

impl CreateLoadBalancerRequest {
    pub fn new(name: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protocol: protocol.into(),
            port: None,
            algorithm: None,
            nodes: Vec::new(),
            public: true,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Attach to the internal service network instead of a public VIP.
    pub fn private(mut self) -> Self {
        self.public = false;
        self
    }

    fn weighted(&self) -> bool {
        self.algorithm
            .as_deref()
            .is_some_and(|a| a.starts_with("WEIGHTED_"))
    }

    fn to_body(&self) -> Result<Value> {
        let Some((protocol, default_port)) = protocol_entry(&self.protocol) else {
            return Err(ResourceError::Validation(format!(
                "invalid protocol: {}",
                self.protocol
            )));
        };
        if let Some(algorithm) = &self.algorithm {
            if !ALLOWED_ALGORITHMS.contains(&algorithm.as_str()) {
                return Err(ResourceError::Validation(format!(
                    "invalid algorithm: {algorithm}"
                )));
            }
        }
        if self.nodes.is_empty() {
            return Err(ResourceError::Validation(
                "a load balancer needs at least one node".into(),
            ));
        }
        let weighted = self.weighted();
        for node in &self.nodes {
            node.validate(weighted)?;
        }

        let vip_kind = if self.public { "PUBLIC" } else { "SERVICENET" };
        let mut balancer = json!({
            "name": self.name,
            "protocol": protocol,
            "port": self.port.unwrap_or(default_port),
            "nodes": self.nodes.iter().map(Node::to_body).collect::<Vec<_>>(),
            "virtualIps": [{ "type": vip_kind }],
        });
        if let Some(algorithm) = &self.algorithm {
            balancer["algorithm"] = json!(algorithm);
        }
        Ok(json!({ "loadBalancer": balancer }))
    }
}

pub struct LoadBalancerHandler<'a, T: Transport = HttpTransport> {
    dispatcher: &'a Dispatcher<T>,
}

impl<'a, T: Transport> LoadBalancerHandler<'a, T> {
    pub fn new(dispatcher: &'a Dispatcher<T>) -> Self {
        Self { dispatcher }
    }

    async fn base(&self, region: Option<&str>) -> Result<Url> {
        self.dispatcher
            .endpoints(LOAD_BALANCER_SERVICE, region)
            .await?
            .into_iter()
            .map(|(_, url)| url)
            .next()
            .ok_or(ResourceError::NoEndpoint { service: "cloudLoadBalancers" })
    }

    /// Balancers across every matching region.
    pub async fn list(&self, region: Option<&str>) -> Result<Vec<LoadBalancer>> {
        let endpoints = self
            .dispatcher
            .endpoints(LOAD_BALANCER_SERVICE, region)
            .await?;
        let mut balancers = Vec::new();
        for (_, base) in endpoints {
            let url = join_path(&base, &["loadbalancers"])?;
            let body = self.dispatcher.get(&url).await?.into_body()?;
            let Some(page) = body.get("loadBalancers") else { continue };
            let mut parsed: Vec<LoadBalancer> = serde_json::from_value(page.clone())
                .map_err(|e| strato_client::Error::Protocol(e.to_string()))?;
            balancers.append(&mut parsed);
        }
        debug!(count = balancers.len(), "listed load balancers");
        Ok(balancers)
    }

    pub async fn get(&self, region: Option<&str>, id: i64) -> Result<LoadBalancer> {
        let url = join_path(&self.base(region).await?, &["loadbalancers", &id.to_string()])?;
        let body = self.dispatcher.get(&url).await?.into_body()?;
        parse_balancer(&body)
    }

    pub async fn create(
        &self,
        region: Option<&str>,
        request: &CreateLoadBalancerRequest,
    ) -> Result<LoadBalancer> {
        let url = join_path(&self.base(region).await?, &["loadbalancers"])?;
        let body = self.dispatcher.post(&url, &request.to_body()?).await?.into_body()?;
        let balancer = parse_balancer(&body)?;
        debug!(id = balancer.id, "created load balancer");
        Ok(balancer)
    }

    pub async fn add_node(&self, region: Option<&str>, id: i64, node: &Node) -> Result<()> {
        node.validate(true)?;
        let url = join_path(
            &self.base(region).await?,
            &["loadbalancers", &id.to_string(), "nodes"],
        )?;
        let payload = json!({ "nodes": [node.to_body()] });
        self.dispatcher.post(&url, &payload).await?;
        Ok(())
    }

    pub async fn delete(&self, region: Option<&str>, id: i64) -> Result<()> {
        let url = join_path(&self.base(region).await?, &["loadbalancers", &id.to_string()])?;
        self.dispatcher.delete(&url).await?;
        Ok(())
    }

    /// Re-fetch until the balancer leaves its converging statuses.
    pub async fn wait_until_ready(
        &self,
        region: Option<&str>,
        id: i64,
        poll_interval: Duration,
    ) -> Result<LoadBalancer> {
        loop {
            let balancer = self.get(region, id).await?;
            if !balancer.is_busy() {
                return Ok(balancer);
            }
            debug!(
                id,
                status = balancer.status.as_deref().unwrap_or("unknown"),
                "load balancer still converging"
            );
            tokio::time::sleep(poll_interval).await;
        }
    }
}

fn parse_balancer(body: &Value) -> Result<LoadBalancer> {
    let payload = body
        .get("loadBalancer")
        .ok_or(ResourceError::MissingField { field: "loadBalancer", context: "load balancer" })?;
    serde_json::from_value(payload.clone())
        .map_err(|e| strato_client::Error::Protocol(e.to_string()).into())
}
