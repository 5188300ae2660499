//! Canonical resource identifiers.
//!
//! Every adapter addresses data through [`ResourceName`]: the MQTT client and
//! the cloud bridge use [`ResourceName::topic`], the CoAP gateway builds its
//! resource tree from [`ResourceName::path_segments`]. No adapter derives its
//! own names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root segment shared by every MQTT topic.
pub const TOPIC_ROOT: &str = "PIOT";

/// Which side of the link owns the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceScope {
    /// The gateway itself
    Gateway,
    /// A constrained (edge) device behind the gateway
    ConstrainedDevice,
}

impl DeviceScope {
    pub fn device_name(&self) -> &'static str {
        match self {
            DeviceScope::Gateway => "GatewayDevice",
            DeviceScope::ConstrainedDevice => "ConstrainedDevice",
        }
    }
}

/// Kind of payload carried by a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    SensorMsg,
    ActuatorCmd,
    ActuatorResponse,
    SystemPerfMsg,
    MgmtStatusMsg,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::SensorMsg => "SensorMsg",
            ResourceType::ActuatorCmd => "ActuatorCmd",
            ResourceType::ActuatorResponse => "ActuatorResponse",
            ResourceType::SystemPerfMsg => "SystemPerfMsg",
            ResourceType::MgmtStatusMsg => "MgmtStatusMsg",
        }
    }
}

/// Fixed set of addressable resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceName {
    GdaMgmtStatus,
    GdaSystemPerf,
    CdaActuatorCmd,
    CdaActuatorResponse,
    CdaSensorMsg,
    CdaSystemPerf,
}

impl ResourceName {
    pub const ALL: [ResourceName; 6] = [
        ResourceName::GdaMgmtStatus,
        ResourceName::GdaSystemPerf,
        ResourceName::CdaActuatorCmd,
        ResourceName::CdaActuatorResponse,
        ResourceName::CdaSensorMsg,
        ResourceName::CdaSystemPerf,
    ];

    pub fn device_scope(&self) -> DeviceScope {
        match self {
            ResourceName::GdaMgmtStatus | ResourceName::GdaSystemPerf => DeviceScope::Gateway,
            _ => DeviceScope::ConstrainedDevice,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            ResourceName::GdaMgmtStatus => ResourceType::MgmtStatusMsg,
            ResourceName::GdaSystemPerf | ResourceName::CdaSystemPerf => ResourceType::SystemPerfMsg,
            ResourceName::CdaActuatorCmd => ResourceType::ActuatorCmd,
            ResourceName::CdaActuatorResponse => ResourceType::ActuatorResponse,
            ResourceName::CdaSensorMsg => ResourceType::SensorMsg,
        }
    }

    /// Name chain used for nested addressing: root, device, resource type.
    pub fn name_chain(&self) -> [&'static str; 3] {
        [
            TOPIC_ROOT,
            self.device_scope().device_name(),
            self.resource_type().as_str(),
        ]
    }

    /// Full publish/subscribe topic, e.g. `PIOT/ConstrainedDevice/SensorMsg`.
    pub fn topic(&self) -> String {
        self.name_chain().join("/")
    }

    /// Constrained-protocol path segments, e.g. `["piot", "cdasensormsg"]`.
    pub fn path_segments(&self) -> [&'static str; 2] {
        let leaf = match self {
            ResourceName::GdaMgmtStatus => "gdamgmt",
            ResourceName::GdaSystemPerf => "gdasysperf",
            ResourceName::CdaActuatorCmd => "cdaactuatorcmd",
            ResourceName::CdaActuatorResponse => "cdaactuatorresponse",
            ResourceName::CdaSensorMsg => "cdasensormsg",
            ResourceName::CdaSystemPerf => "cdasysperf",
        };
        ["piot", leaf]
    }

    /// Constrained-protocol path with a leading separator.
    pub fn path(&self) -> String {
        format!("/{}", self.path_segments().join("/"))
    }

    /// Reverse topic lookup for inbound messages.
    pub fn from_topic(topic: &str) -> Option<ResourceName> {
        Self::ALL.into_iter().find(|r| r.topic() == topic)
    }

    /// Reverse path lookup, tolerant of leading/trailing separators.
    pub fn from_path(path: &str) -> Option<ResourceName> {
        let wanted: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        Self::ALL
            .into_iter()
            .find(|r| r.path_segments().as_slice() == wanted.as_slice())
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_topics_match_table() {
        assert_eq!(ResourceName::GdaMgmtStatus.topic(), "PIOT/GatewayDevice/MgmtStatusMsg");
        assert_eq!(ResourceName::CdaActuatorCmd.topic(), "PIOT/ConstrainedDevice/ActuatorCmd");
        assert_eq!(
            ResourceName::CdaActuatorResponse.topic(),
            "PIOT/ConstrainedDevice/ActuatorResponse"
        );
        assert_eq!(ResourceName::CdaSensorMsg.topic(), "PIOT/ConstrainedDevice/SensorMsg");
        assert_eq!(ResourceName::CdaSystemPerf.topic(), "PIOT/ConstrainedDevice/SystemPerfMsg");
    }

    #[test]
    fn test_paths_match_table() {
        assert_eq!(ResourceName::GdaMgmtStatus.path(), "/piot/gdamgmt");
        assert_eq!(ResourceName::CdaActuatorCmd.path(), "/piot/cdaactuatorcmd");
        assert_eq!(ResourceName::CdaSensorMsg.path(), "/piot/cdasensormsg");
        assert_eq!(ResourceName::CdaSystemPerf.path(), "/piot/cdasysperf");
    }

    #[test]
    fn test_mapping_is_stable_and_injective() {
        let mut topics = HashSet::new();
        let mut paths = HashSet::new();
        for r in ResourceName::ALL {
            assert_eq!(r.topic(), r.topic());
            assert_eq!(r.path(), r.path());
            assert!(topics.insert(r.topic()));
            assert!(paths.insert(r.path()));
            assert_eq!(ResourceName::from_topic(&r.topic()), Some(r));
            assert_eq!(ResourceName::from_path(&r.path()), Some(r));
        }
    }

    #[test]
    fn test_unknown_lookups() {
        assert_eq!(ResourceName::from_topic("PIOT/Unknown/Thing"), None);
        assert_eq!(ResourceName::from_path("/piot"), None);
        assert_eq!(ResourceName::from_path("piot/cdasensormsg/"), Some(ResourceName::CdaSensorMsg));
    }
}
