//! Reply decoding.
//!
//! Bodies are decoded once, from the route fixed at dispatch, into a
//! [`Decoded`] variant. Handlers only ever see typed data.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::command::resource::{CellAck, FrameAck, LinkReport, ProbeAck};
use crate::command::{Resource, ResourcePath, Route};
use crate::node::NodeId;

/// What a mote answered to a read.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// Link quality per neighbour, from a statistics resource.
    Statistics(LinkReport),
    /// Anything else, as received.
    Raw(Value),
}

/// A successful reply, decoded according to its route.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Children(Vec<NodeId>),
    FrameInstalled(FrameAck),
    CellInstalled(CellAck),
    ProbeInstalled(ProbeAck),
    Reported(Report),
    Removed(Value),
}

fn parse<T: DeserializeOwned>(body: &Value) -> Result<T, String> {
    serde_json::from_value(body.clone()).map_err(|e| e.to_string())
}

/// Decode `body`; `prefix` qualifies bare interface ids in children lists.
pub fn decode(route: Route, path: &ResourcePath, body: &Value, prefix: u16) -> Result<Decoded, String> {
    match route {
        Route::Children => {
            let raw: Vec<String> = parse(body)?;
            let children = raw
                .iter()
                .map(|s| NodeId::parse_with_prefix(s, prefix).map_err(|e| e.to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Decoded::Children(children))
        }
        Route::SlotframeInstall => parse(body).map(Decoded::FrameInstalled),
        Route::CellInstall => parse(body).map(Decoded::CellInstalled),
        Route::ProbeInstall => parse(body).map(Decoded::ProbeInstalled),
        Route::Report if path.resource() == Some(Resource::StatisticsValues) => {
            parse(body).map(|r| Decoded::Reported(Report::Statistics(r)))
        }
        Route::Report => Ok(Decoded::Reported(Report::Raw(body.clone()))),
        Route::CellRemoval | Route::Removal => Ok(Decoded::Removed(body.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::DEFAULT_PREFIX;
    use serde_json::json;

    fn path(r: Resource) -> ResourcePath {
        ResourcePath::new(r)
    }

    #[test]
    fn test_children_accept_bare_and_full_ids() {
        let d = decode(
            Route::Children,
            &path(Resource::RplChildren),
            &json!(["2", "aaaa::3", "[aaaa::4]:5684"]),
            DEFAULT_PREFIX,
        )
        .unwrap();
        let Decoded::Children(c) = d else { panic!("wrong variant") };
        assert_eq!(c.len(), 3);
        assert_eq!(c[0].interface_id(), 2);
        assert_eq!(c[2].interface_id(), 4);
    }

    #[test]
    fn test_children_rejects_garbage() {
        assert!(decode(Route::Children, &path(Resource::RplChildren), &json!({"x": 1}), DEFAULT_PREFIX).is_err());
        assert!(decode(Route::Children, &path(Resource::RplChildren), &json!(["zz:zz:zz"]), DEFAULT_PREFIX).is_err());
    }

    #[test]
    fn test_acks() {
        let d = decode(Route::SlotframeInstall, &path(Resource::Slotframe), &json!({"fd": 3}), 0).unwrap();
        assert_eq!(d, Decoded::FrameInstalled(FrameAck { alias: 3 }));
        let d = decode(Route::CellInstall, &path(Resource::CellList), &json!({"cd": 12}), 0).unwrap();
        assert_eq!(d, Decoded::CellInstalled(CellAck { id: 12 }));
        assert!(decode(Route::CellInstall, &path(Resource::CellList), &json!({"fd": 1}), 0).is_err());
    }

    #[test]
    fn test_statistics_report() {
        let p = ResourcePath::entry(Resource::StatisticsValues, 0);
        let d = decode(Route::Report, &p, &json!({"aaaa::2": {"ETX": 120, "PRR": 98}}), 0).unwrap();
        let Decoded::Reported(Report::Statistics(r)) = d else { panic!("wrong variant") };
        assert_eq!(r["aaaa::2"].etx, Some(120.0));

        let d = decode(Route::Report, &path(Resource::CellList), &json!([1, 2]), 0).unwrap();
        assert_eq!(d, Decoded::Reported(Report::Raw(json!([1, 2]))));
    }
}
