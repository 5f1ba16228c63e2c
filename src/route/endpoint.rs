//! Backend instance description.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

/// One backend process instance.
///
/// Identity is the canonical `host:port` address: two endpoints with the same
/// address are the same instance regardless of their metadata. A registration
/// carrying different metadata for a known address replaces the endpoint
/// wholesale, it is never mutated in place.
#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    #[serde(rename = "address")]
    addr: String,
    #[serde(rename = "app")]
    app_id: String,
    tags: BTreeMap<String, String>,
    private_instance_id: String,
}

impl Endpoint {
    /// Creates an endpoint for the instance listening on `host:port`.
    pub fn new(
        app_id: impl Into<String>,
        host: &str,
        port: u16,
        private_instance_id: impl Into<String>,
        tags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            app_id: app_id.into(),
            tags,
            private_instance_id: private_instance_id.into(),
        }
    }

    /// Returns the `host:port` identity of this instance.
    pub fn canonical_addr(&self) -> &str {
        &self.addr
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Secondary identity used for sticky sessions. May be empty.
    pub fn private_instance_id(&self) -> &str {
        &self.private_instance_id
    }

    /// Returns true when every field, not just the address, matches.
    pub(crate) fn same_registration(&self, other: &Endpoint) -> bool {
        self.addr == other.addr
            && self.app_id == other.app_id
            && self.private_instance_id == other.private_instance_id
            && self.tags == other.tags
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_canonical_addr_joins_host_and_port() {
        let e = Endpoint::new("app", "192.168.1.1", 1234, "id-1", BTreeMap::new());
        assert_eq!(e.canonical_addr(), "192.168.1.1:1234");
        assert_eq!(e.to_string(), "192.168.1.1:1234");
    }

    #[test]
    fn test_equality_is_by_address() {
        let a = Endpoint::new("app-a", "10.0.0.1", 80, "a", BTreeMap::new());
        let b = Endpoint::new("app-b", "10.0.0.1", 80, "b", tags(&[("zone", "z1")]));
        let c = Endpoint::new("app-a", "10.0.0.1", 81, "a", BTreeMap::new());

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<Endpoint> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_same_registration_compares_metadata() {
        let a = Endpoint::new("app", "10.0.0.1", 80, "a", tags(&[("zone", "z1")]));
        let same = Endpoint::new("app", "10.0.0.1", 80, "a", tags(&[("zone", "z1")]));
        let retagged = Endpoint::new("app", "10.0.0.1", 80, "a", tags(&[("zone", "z2")]));
        let reinstanced = Endpoint::new("app", "10.0.0.1", 80, "b", tags(&[("zone", "z1")]));

        assert!(a.same_registration(&same));
        assert!(!a.same_registration(&retagged));
        assert!(!a.same_registration(&reinstanced));
    }

    #[test]
    fn test_serializes_with_wire_names() {
        let e = Endpoint::new("app", "1.2.3.4", 5678, "pid", tags(&[("component", "web")]));
        let json = serde_json::to_value(&e).unwrap();

        assert_eq!(json["address"], "1.2.3.4:5678");
        assert_eq!(json["app"], "app");
        assert_eq!(json["private_instance_id"], "pid");
        assert_eq!(json["tags"]["component"], "web");
    }
}
