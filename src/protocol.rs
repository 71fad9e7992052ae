/*!
 * Protocol metadata and per-hop protocol selection
 *
 * Slingshot never moves bytes itself. It only decides which scheme a hop
 * should be submitted with; the transfer tool behind the submission layer
 * owns the wire protocol.
 */

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlingshotError};
use crate::topology::Endpoint;

/// One protocol supported by an endpoint. Lower priority value wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDescriptor {
    pub scheme: String,
    pub priority: u32,
}

impl ProtocolDescriptor {
    pub fn new<S: Into<String>>(scheme: S, priority: u32) -> Self {
        Self {
            scheme: scheme.into(),
            priority,
        }
    }
}

/// Schemes two protocol sets have in common, ordered by combined priority
pub fn common_schemes(a: &[ProtocolDescriptor], b: &[ProtocolDescriptor]) -> Vec<String> {
    let mut matches: Vec<(u32, &str)> = Vec::new();
    for pa in a {
        if let Some(pb) = b.iter().find(|pb| pb.scheme == pa.scheme) {
            matches.push((pa.priority + pb.priority, pa.scheme.as_str()));
        }
    }
    matches.sort_by(|x, y| x.0.cmp(&y.0).then_with(|| x.1.cmp(y.1)));
    matches.into_iter().map(|(_, s)| s.to_string()).collect()
}

/// Picks the operational protocol for a hop
pub trait ProtocolFactory: Send + Sync {
    /// The scheme a transfer between these two endpoints should use
    fn protocol_for(&self, src: &Endpoint, dst: &Endpoint) -> Result<String>;
}

/// Default factory: best common scheme by combined priority
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProtocolFactory;

impl ProtocolFactory for DefaultProtocolFactory {
    fn protocol_for(&self, src: &Endpoint, dst: &Endpoint) -> Result<String> {
        common_schemes(&src.protocols, &dst.protocols)
            .into_iter()
            .next()
            .ok_or_else(|| {
                SlingshotError::config(format!(
                    "no common scheme between {} and {}",
                    src.name, dst.name
                ))
            })
    }
}
