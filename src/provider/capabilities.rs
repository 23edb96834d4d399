//! Endpoint classes and their streaming strategies.

use std::collections::HashMap;

/// Kind of chat-completion endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EndpointClass {
    /// The provider's own API.
    FirstParty,
    /// A gateway or server speaking the same protocol.
    Compatible,
}

/// How a streamed response is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StreamStrategy {
    /// Strict event-source client; rejects unrecognized stream shapes.
    Managed,
    /// Line-by-line parsing of raw `data:` chunks; skips what it cannot read.
    RawChunks,
}

/// Preferred strategy plus an optional fallback used when the preferred one
/// fails on stream shape before producing any chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPlan {
    pub preferred: StreamStrategy,
    pub fallback: Option<StreamStrategy>,
}

impl StreamPlan {
    pub const fn new(preferred: StreamStrategy, fallback: Option<StreamStrategy>) -> Self {
        Self { preferred, fallback }
    }
}

/// `endpoint class -> stream plan` table.
#[derive(Debug, Clone)]
pub struct CapabilityTable {
    first_party_hosts: Vec<String>,
    plans: HashMap<EndpointClass, StreamPlan>,
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self {
            first_party_hosts: vec!["openai.com".to_string()],
            plans: HashMap::from([
                (
                    EndpointClass::FirstParty,
                    StreamPlan::new(StreamStrategy::Managed, Some(StreamStrategy::RawChunks)),
                ),
                (
                    EndpointClass::Compatible,
                    StreamPlan::new(StreamStrategy::RawChunks, None),
                ),
            ]),
        }
    }
}

impl CapabilityTable {
    /// Replace the plan for `class`.
    pub fn with_plan(mut self, class: EndpointClass, plan: StreamPlan) -> Self {
        self.plans.insert(class, plan);
        self
    }

    /// Treat `host` and its subdomains as first-party.
    pub fn with_first_party_host(mut self, host: impl Into<String>) -> Self {
        self.first_party_hosts.push(host.into().to_ascii_lowercase());
        self
    }

    /// Classify a user-supplied base URL. No URL means the default
    /// first-party endpoint.
    pub fn classify(&self, base_url: &str) -> EndpointClass {
        let raw = base_url.trim();
        if raw.is_empty() {
            return EndpointClass::FirstParty;
        }
        let host = reqwest::Url::parse(raw)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase));
        let Some(host) = host else {
            return EndpointClass::Compatible;
        };
        let first_party = self.first_party_hosts.iter().any(|suffix| {
            host == *suffix || host.ends_with(&format!(".{suffix}"))
        });
        if first_party {
            EndpointClass::FirstParty
        } else {
            EndpointClass::Compatible
        }
    }

    pub fn plan_for(&self, class: EndpointClass) -> StreamPlan {
        self.plans
            .get(&class)
            .copied()
            .unwrap_or(StreamPlan::new(StreamStrategy::RawChunks, None))
    }

    pub fn plan_for_url(&self, base_url: &str) -> StreamPlan {
        self.plan_for(self.classify(base_url))
    }
}
