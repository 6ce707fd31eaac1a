use crate::protocol::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier a node announces on the bus (`"leader"`, `"T"`, a pilot name, ...)
pub type NodeId = String;

/// Ordered, non-empty list of hops a message travels through.
///
/// The first hop is the node the sender hands the message to. Every hop
/// strips itself and forwards the remainder; the node that sees a route of
/// length one is the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<NodeId>", into = "Vec<NodeId>")]
pub struct Route(Vec<NodeId>);

impl Route {
    /// Single-hop route straight to `id`
    pub fn to(id: impl Into<NodeId>) -> Self {
        Route(vec![id.into()])
    }

    /// Multi-hop route through `hops`, in order
    pub fn through<I, S>(hops: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let hops: Vec<NodeId> = hops.into_iter().map(Into::into).collect();
        if hops.is_empty() {
            return Err(ProtocolError::EmptyRoute);
        }
        Ok(Route(hops))
    }

    /// The hop this route is handed to next
    pub fn first(&self) -> &str {
        &self.0[0]
    }

    /// The final destination
    pub fn destination(&self) -> &str {
        &self.0[self.0.len() - 1]
    }

    pub fn is_final(&self) -> bool {
        self.0.len() == 1
    }

    pub fn hops(&self) -> &[NodeId] {
        &self.0
    }

    /// Route remaining after the first hop has been consumed, `None` at the destination
    pub fn advance(&self) -> Option<Route> {
        if self.is_final() {
            None
        } else {
            Some(Route(self.0[1..].to_vec()))
        }
    }
}

impl TryFrom<Vec<NodeId>> for Route {
    type Error = ProtocolError;

    fn try_from(hops: Vec<NodeId>) -> Result<Self> {
        Route::through(hops)
    }
}

impl From<Route> for Vec<NodeId> {
    fn from(route: Route) -> Self {
        route.0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" -> "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_hop_route() {
        let route = Route::to("leader");
        assert!(route.is_final());
        assert_eq!(route.first(), "leader");
        assert_eq!(route.destination(), "leader");
        assert!(route.advance().is_none());
    }

    #[test]
    fn test_multi_hop_route_advances() {
        let route = Route::through(["T", "pilot_1"]).unwrap();
        assert_eq!(route.first(), "T");
        assert_eq!(route.destination(), "pilot_1");

        let rest = route.advance().unwrap();
        assert_eq!(rest, Route::to("pilot_1"));
        assert_eq!(route.to_string(), "T -> pilot_1");
    }

    #[test]
    fn test_empty_route_rejected() {
        let hops: Vec<String> = Vec::new();
        assert!(matches!(
            Route::through(hops),
            Err(ProtocolError::EmptyRoute)
        ));
        assert!(serde_json::from_str::<Route>("[]").is_err());
    }
}
