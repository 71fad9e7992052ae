/*!
 * Transfer requests and candidate source replicas
 */

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::topology::EndpointId;

/// Lifecycle of a transfer request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Queued,
    Submitted,
    Done,
    Failed,
    Lost,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Done | RequestState::Failed | RequestState::Lost
        )
    }
}

/// Optional request attributes, persisted alongside the request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestAttributes {
    /// Set on synthetic requests that represent one segment of a
    /// multihop chain
    #[serde(default)]
    pub is_intermediate_hop: bool,

    /// Restricts which endpoints may serve as a source. Recorded on
    /// intermediate hop requests so later cycles route them correctly.
    #[serde(default)]
    pub source_replica_expression: Option<String>,

    /// Activity label used for statistics bucketing
    #[serde(default)]
    pub activity: Option<String>,

    /// The request wants its data staged through a buffer
    #[serde(default)]
    pub requires_staging: bool,

    /// Grace period before the intermediate replica becomes eligible for
    /// deletion. Consumed by the external replica-maintenance collaborator.
    #[serde(default)]
    pub tombstone_delay_secs: Option<i64>,
}

impl RequestAttributes {
    /// Endpoint names admitted by the source replica expression.
    /// Membership lists compose with `|` or `,`; None means unrestricted.
    pub fn source_expression_members(&self) -> Option<HashSet<String>> {
        self.source_replica_expression.as_ref().map(|expr| {
            expr.split(['|', ','])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

/// A unit of data-movement work: one data item toward one destination
#[derive(Debug, Clone)]
pub struct Request {
    pub id: Uuid,
    pub data_id: Uuid,
    pub dest: EndpointId,
    pub state: RequestState,
    pub bytes: u64,
    pub attributes: RequestAttributes,
    /// Assigned when a source wins submission; also pre-set on queued rows
    /// to account for bytes already routed toward a source
    pub source: Option<EndpointId>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Request {
    pub fn queued(data_id: Uuid, dest: EndpointId, bytes: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            data_id,
            dest,
            state: RequestState::Queued,
            bytes,
            attributes: RequestAttributes::default(),
            source: None,
            created_at: Utc::now(),
            submitted_at: None,
        }
    }

    pub fn with_attributes(mut self, attributes: RequestAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_source(mut self, source: EndpointId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Candidate origin replica for a request
#[derive(Debug, Clone)]
pub struct Source {
    pub endpoint: EndpointId,
    /// Feedback score. Completion reporting decrements it on failure, so
    /// repeatedly failing sources sink in the ordering. Read fresh each
    /// cycle, never cached across cycles.
    pub ranking: i32,
    /// Schemes this replica is reachable with; empty falls back to the
    /// endpoint's protocol set
    pub schemes: Vec<String>,
}

impl Source {
    pub fn new(endpoint: EndpointId) -> Self {
        Self {
            endpoint,
            ranking: 0,
            schemes: Vec::new(),
        }
    }

    pub fn with_ranking(mut self, ranking: i32) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_schemes(mut self, schemes: Vec<String>) -> Self {
        self.schemes = schemes;
        self
    }
}

/// A request paired with its candidate sources, as returned by the
/// list-and-mark batch query
#[derive(Debug, Clone)]
pub struct RequestWithSources {
    pub request: Request,
    pub sources: Vec<Source>,
}

impl RequestWithSources {
    pub fn new(request: Request, sources: Vec<Source>) -> Self {
        Self { request, sources }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!RequestState::Queued.is_terminal());
        assert!(!RequestState::Submitted.is_terminal());
        assert!(RequestState::Done.is_terminal());
        assert!(RequestState::Failed.is_terminal());
        assert!(RequestState::Lost.is_terminal());
    }

    #[test]
    fn test_expression_members() {
        let attrs = RequestAttributes {
            source_replica_expression: Some("SITE_A|SITE_B, SITE_C".to_string()),
            ..Default::default()
        };
        let members = attrs.source_expression_members().unwrap();
        assert_eq!(members.len(), 3);
        assert!(members.contains("SITE_A"));
        assert!(members.contains("SITE_B"));
        assert!(members.contains("SITE_C"));

        assert!(RequestAttributes::default()
            .source_expression_members()
            .is_none());
    }

    #[test]
    fn test_queued_request_defaults() {
        let dest = EndpointId::generate();
        let request = Request::queued(Uuid::new_v4(), dest, 1024);
        assert_eq!(request.state, RequestState::Queued);
        assert_eq!(request.dest, dest);
        assert!(request.source.is_none());
        assert!(request.submitted_at.is_none());
        assert!(!request.attributes.is_intermediate_hop);
    }
}
