//! Cluster topology seam.
//!
//! The pipeline only needs candidate endpoint URIs; how they are resolved
//! (static list, service discovery, DNS) is the provider's business.
//! Selection policy (round-robin over whatever the provider returns) is
//! owned by the dispatcher, not here.

use std::fmt;
use url::Url;

/// Supplies candidate ingestion endpoints for outbound batches.
///
/// Called once per send, so a provider may refresh its view between calls.
pub trait ClusterProvider: fmt::Debug + Send + Sync {
    /// Current candidate endpoints, in provider-preferred order.
    fn endpoints(&self) -> Vec<Url>;
}

/// A provider over a fixed endpoint list.
#[derive(Debug, Clone)]
pub struct FixedClusterProvider {
    endpoints: Vec<Url>,
}

impl FixedClusterProvider {
    /// Provider over a single endpoint.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoints: vec![endpoint],
        }
    }

    /// Provider over several equivalent endpoints.
    pub fn from_endpoints(endpoints: Vec<Url>) -> Self {
        Self { endpoints }
    }
}

impl ClusterProvider for FixedClusterProvider {
    fn endpoints(&self) -> Vec<Url> {
        self.endpoints.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_provider_returns_configured_endpoints() {
        let single = FixedClusterProvider::new(Url::parse("http://localhost:6306").unwrap());
        assert_eq!(single.endpoints().len(), 1);

        let multi = FixedClusterProvider::from_endpoints(vec![
            Url::parse("http://a:6306").unwrap(),
            Url::parse("http://b:6306").unwrap(),
        ]);
        assert_eq!(multi.endpoints().len(), 2);
    }
}
