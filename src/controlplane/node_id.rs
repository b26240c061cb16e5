//! Node Identity Parser
//!
//! Decodes the composite node id reported by the node plugin:
//!
//! ```text
//! <host>,<tag>:<value>[,<continuation>...][,<tag>:<value>...]
//! ```
//!
//! Recognized tags are `wwpn` (port names), `wwnn` or its short form `wwn`
//! (node names) and `iqn`.
//! A segment without a tag prefix continues the most recently opened value,
//! so initiator names that contain commas survive the round trip.

use tracing::warn;

pub const WWPN_TAG: &str = "wwpn";
pub const WWNN_TAG: &str = "wwnn";
pub const WWN_TAG: &str = "wwn";
pub const IQN_TAG: &str = "iqn";

/// Host name plus per-protocol initiator lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIdentity {
    pub host_name: String,
    /// Fibre-channel world wide port names
    pub wwpns: Vec<String>,
    /// Fibre-channel world wide node names
    pub wwnns: Vec<String>,
    /// iSCSI qualified names
    pub iqns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Wwpn,
    Wwnn,
    Iqn,
}

impl Tag {
    fn split(segment: &str) -> Option<(Tag, &str)> {
        [
            (Tag::Wwpn, WWPN_TAG),
            (Tag::Wwnn, WWNN_TAG),
            (Tag::Wwnn, WWN_TAG),
            (Tag::Iqn, IQN_TAG),
        ]
            .into_iter()
            .find_map(|(tag, name)| {
                segment
                    .strip_prefix(name)
                    .and_then(|rest| rest.strip_prefix(':'))
                    .map(|value| (tag, value))
            })
    }
}

impl NodeIdentity {
    /// Parse a composite node id. Never fails; malformed continuations are
    /// logged and dropped.
    pub fn parse(node_id: &str) -> Self {
        let mut segments = node_id.split(',');
        let mut identity = NodeIdentity {
            host_name: segments.next().unwrap_or_default().to_string(),
            ..Default::default()
        };

        let mut current: Option<Tag> = None;
        for segment in segments {
            match Tag::split(segment) {
                Some((tag, value)) => {
                    identity.list_mut(tag).push(value.to_string());
                    current = Some(tag);
                }
                None => {
                    let entry = match current {
                        Some(tag) => identity.list_mut(tag).last_mut(),
                        None => None,
                    };
                    match entry {
                        Some(entry) => {
                            entry.push(',');
                            entry.push_str(segment);
                        }
                        None => warn!(
                            node_id,
                            segment, "The format of nodeId is incorrect, dropping segment"
                        ),
                    }
                }
            }
        }

        identity
    }

    fn list_mut(&mut self, tag: Tag) -> &mut Vec<String> {
        match tag {
            Tag::Wwpn => &mut self.wwpns,
            Tag::Wwnn => &mut self.wwnns,
            Tag::Iqn => &mut self.iqns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iqn_with_commas() {
        let id = NodeIdentity::parse("host1,iqn:iqn.1993-08.org.debian:01:abc,more,wwn:500143802426baf8");

        assert_eq!(id.host_name, "host1");
        assert_eq!(id.iqns, vec!["iqn.1993-08.org.debian:01:abc,more".to_string()]);
        assert!(id.wwpns.is_empty());
        assert_eq!(id.wwnns, vec!["500143802426baf8".to_string()]);
    }

    #[test]
    fn test_unknown_tag_is_continuation() {
        let id = NodeIdentity::parse("host1,iqn:iqn.1993-08.org.debian:01:abc,eui:02004567a425678d");
        assert_eq!(
            id.iqns,
            vec!["iqn.1993-08.org.debian:01:abc,eui:02004567a425678d".to_string()]
        );
    }

    #[test]
    fn test_fibre_channel_names() {
        let id = NodeIdentity::parse(
            "node-b,wwpn:21000024ff3a1b2c,wwpn:21000024ff3a1b2d,wwnn:20000024ff3a1b2c",
        );
        assert_eq!(id.host_name, "node-b");
        assert_eq!(id.wwpns, vec!["21000024ff3a1b2c", "21000024ff3a1b2d"]);
        assert_eq!(id.wwnns, vec!["20000024ff3a1b2c"]);
        assert!(id.iqns.is_empty());
    }

    #[test]
    fn test_continuation_follows_latest_tag() {
        let id = NodeIdentity::parse("h,wwpn:a,iqn:b,c,wwpn:d,e");
        assert_eq!(id.wwpns, vec!["a", "d,e"]);
        assert_eq!(id.iqns, vec!["b,c"]);
    }

    #[test]
    fn test_leading_continuation_dropped() {
        let id = NodeIdentity::parse("host1,garbage,iqn:iqn.x");
        assert_eq!(id.host_name, "host1");
        assert_eq!(id.iqns, vec!["iqn.x"]);
    }

    #[test]
    fn test_host_only_and_empty() {
        assert_eq!(NodeIdentity::parse("host1").host_name, "host1");
        assert_eq!(NodeIdentity::parse(""), NodeIdentity::default());
    }
}
