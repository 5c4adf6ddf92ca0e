//! Remote resources exposed by the motes and the bodies exchanged with them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frame::LinkType;
use crate::node::NodeId;

/// The resource tables a mote exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    /// RPL children list of the mote.
    RplChildren,
    /// The mote's view of the DoDAG.
    RplDodag,
    /// 6top slotframe table.
    Slotframe,
    /// 6top cell list.
    CellList,
    /// Statistics definitions.
    StatisticsDefinition,
    /// Statistics values, one sub-resource per definition.
    StatisticsValues,
}

impl Resource {
    pub const ALL: [Resource; 6] = [
        Resource::RplChildren,
        Resource::RplDodag,
        Resource::Slotframe,
        Resource::CellList,
        Resource::StatisticsDefinition,
        Resource::StatisticsValues,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Resource::RplChildren => "rpl/c",
            Resource::RplDodag => "rpl/dodag",
            Resource::Slotframe => "6t/6/sf",
            Resource::CellList => "6t/6/cl",
            Resource::StatisticsDefinition => "6t/6/sm",
            Resource::StatisticsValues => "6t/6/ml",
        }
    }

    /// Identify the table a path belongs to (`6t/6/cl/4` → `CellList`).
    pub fn classify(path: &str) -> Option<Resource> {
        Resource::ALL.into_iter().find(|r| {
            let base = r.path();
            path == base
                || path
                    .strip_prefix(base)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// A resource path plus optional query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath {
    path: String,
    query: BTreeMap<String, String>,
}

impl ResourcePath {
    pub fn new(resource: Resource) -> Self {
        ResourcePath {
            path: resource.path().to_string(),
            query: BTreeMap::new(),
        }
    }

    /// A single entry of a table, e.g. `6t/6/cl/4`.
    pub fn entry(resource: Resource, id: u16) -> Self {
        ResourcePath {
            path: format!("{}/{}", resource.path(), id),
            query: BTreeMap::new(),
        }
    }

    /// Parse `path?key=value&key=value`.
    pub fn parse(raw: &str) -> Self {
        let (path, query) = match raw.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (raw, None),
        };
        let query = query
            .map(|q| {
                q.split('&')
                    .filter(|pair| !pair.is_empty())
                    .map(|pair| match pair.split_once('=') {
                        Some((k, v)) => (k.to_string(), v.to_string()),
                        None => (pair.to_string(), String::new()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        ResourcePath {
            path: path.trim_matches('/').to_string(),
            query,
        }
    }

    pub fn with_query(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn resource(&self) -> Option<Resource> {
        Resource::classify(&self.path)
    }

    /// The trailing numeric segment, if the path addresses a table entry.
    pub fn entry_id(&self) -> Option<u16> {
        let base = self.resource()?.path();
        self.path.strip_prefix(base)?.strip_prefix('/')?.parse().ok()
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        let mut sep = '?';
        for (k, v) in &self.query {
            write!(f, "{}{}={}", sep, k, v)?;
            sep = '&';
        }
        Ok(())
    }
}

// ── Request bodies ────────────────────────────────────────────────────

/// Body of a slotframe install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotframeBody {
    #[serde(rename = "ns")]
    pub size: u16,
}

/// Body of a cell install, as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellBody {
    #[serde(rename = "so")]
    pub slot: u16,
    #[serde(rename = "co")]
    pub channel: u8,
    #[serde(rename = "fd")]
    pub frame: u8,
    #[serde(rename = "lo")]
    pub option: u8,
    #[serde(rename = "lt")]
    pub link_type: LinkType,
    #[serde(rename = "na")]
    pub target: NodeId,
}

/// Body of a statistics definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsBody {
    #[serde(rename = "mt")]
    pub metrics: Vec<String>,
}

// ── Reply bodies ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameAck {
    #[serde(rename = "fd")]
    pub alias: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellAck {
    #[serde(rename = "cd")]
    pub id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeAck {
    #[serde(rename = "md")]
    pub id: u16,
}

/// Link quality a mote reports towards one neighbour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkStats {
    #[serde(rename = "ETX", default, skip_serializing_if = "Option::is_none")]
    pub etx: Option<f64>,
    #[serde(rename = "PRR", default, skip_serializing_if = "Option::is_none")]
    pub prr: Option<f64>,
    #[serde(rename = "RSSI", default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
}

/// A statistics notification: neighbour address → link quality.
pub type LinkReport = BTreeMap<String, LinkStats>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(Resource::classify("6t/6/cl"), Some(Resource::CellList));
        assert_eq!(Resource::classify("6t/6/cl/12"), Some(Resource::CellList));
        assert_eq!(Resource::classify("6t/6/ml/0"), Some(Resource::StatisticsValues));
        assert_eq!(Resource::classify("rpl/c"), Some(Resource::RplChildren));
        assert_eq!(Resource::classify("rpl/cx"), None);
        assert_eq!(Resource::classify("nope"), None);
    }

    #[test]
    fn test_query_round_trip() {
        let p = ResourcePath::new(Resource::CellList)
            .with_query("so", 3)
            .with_query("co", 1)
            .with_query("fd", 2);
        assert_eq!(p.to_string(), "6t/6/cl?co=1&fd=2&so=3");
        let back = ResourcePath::parse(&p.to_string());
        assert_eq!(back, p);
        assert_eq!(back.query_value("so"), Some("3"));
    }

    #[test]
    fn test_entry_id() {
        assert_eq!(ResourcePath::entry(Resource::CellList, 9).entry_id(), Some(9));
        assert_eq!(ResourcePath::new(Resource::CellList).entry_id(), None);
        assert_eq!(ResourcePath::parse("/6t/6/ml/4").entry_id(), Some(4));
    }

    #[test]
    fn test_cell_body_keys() {
        let body = CellBody {
            slot: 1,
            channel: 0,
            frame: 2,
            option: 9,
            link_type: LinkType::Advertising,
            target: NodeId::BROADCAST,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["so"], 1);
        assert_eq!(json["fd"], 2);
        assert_eq!(json["lo"], 9);
        assert_eq!(json["lt"], 1);
        assert_eq!(json["na"], "[ff02::1a]:5684");
    }

    #[test]
    fn test_link_report_decodes_partial_stats() {
        let report: LinkReport =
            serde_json::from_str(r#"{"aaaa::2": {"ETX": 900}, "aaaa::3": {"PRR": 95, "RSSI": -70}}"#)
                .unwrap();
        assert_eq!(report["aaaa::2"].etx, Some(900.0));
        assert_eq!(report["aaaa::3"].prr, Some(95.0));
        assert_eq!(report["aaaa::3"].etx, None);
    }
}
