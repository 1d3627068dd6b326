//! Topic addressing
//!
//! Pure functions mapping logical operations and entity identifiers onto the
//! DAB topic hierarchy, and back again:
//!
//! - `<root>/bridge/<bridgeId>/<operation>` - bridge management
//! - `<root>/discovery` - global discovery broadcast
//! - `<root>/<deviceId>/<operation-path>` - per-device operations
//! - `<root>[/<deviceId>]/messages` - notification stream
//! - `<root>/<deviceId>/device-telemetry/metrics[/<appId>]` - telemetry
//! - `_response/<request topic>/<correlation id>` - private response topics

pub mod validation;

pub use validation::{
    topic_matches_filter, validate_topic_filter, validate_topic_level, validate_topic_name,
};

/// Prefix for all derived response topics
pub const RESPONSE_PREFIX: &str = "_response";

/// Bridge namespace segment
pub const BRIDGE_SEGMENT: &str = "bridge";

/// Discovery operation
pub const DISCOVERY: &str = "discovery";

/// Notification stream segment
pub const MESSAGES: &str = "messages";

/// Device telemetry delivery path (relative to the device namespace)
pub const TELEMETRY_METRICS: &str = "device-telemetry/metrics";

/// Derive the private response topic for a request.
///
/// The topic is scoped to both the request topic and the correlation id so it
/// is never reused across requests.
pub fn response_topic(request_topic: &str, correlation_id: &str) -> String {
    format!("{}/{}/{}", RESPONSE_PREFIX, request_topic, correlation_id)
}

/// Strip the last level from a topic (`a/b/c` -> `a/b`)
pub fn base_topic(topic: &str) -> &str {
    match topic.rfind('/') {
        Some(pos) => &topic[..pos],
        None => "",
    }
}

/// Classification of an inbound topic relative to one bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    /// Management operation addressed to this bridge
    Bridge(&'a str),
    /// Global discovery broadcast
    Discovery,
    /// Operation addressed to a (possibly registered) device
    Device {
        device_id: &'a str,
        operation: &'a str,
    },
    /// Anything else observed on the transport
    Unrecognized,
}

/// Topic builder for one bridge identity under a root namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    root: String,
    bridge_id: String,
}

impl Topics {
    pub fn new(root: impl Into<String>, bridge_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bridge_id: bridge_id.into(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn bridge_id(&self) -> &str {
        &self.bridge_id
    }

    /// `<root>/bridge/<bridgeId>/<operation>`
    pub fn bridge(&self, operation: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.root, BRIDGE_SEGMENT, self.bridge_id, operation
        )
    }

    /// Filter matching every bridge management operation
    pub fn bridge_filter(&self) -> String {
        self.bridge("+")
    }

    /// `<root>/discovery`
    pub fn discovery(&self) -> String {
        format!("{}/{}", self.root, DISCOVERY)
    }

    /// `<root>/messages`
    pub fn messages(&self) -> String {
        format!("{}/{}", self.root, MESSAGES)
    }

    /// `<root>/<deviceId>/<operation-path>`
    pub fn device(&self, device_id: &str, operation: &str) -> String {
        format!("{}/{}/{}", self.root, device_id, operation)
    }

    /// Filter matching the whole namespace of a device
    pub fn device_filter(&self, device_id: &str) -> String {
        self.device(device_id, "#")
    }

    /// `<root>/<deviceId>/messages`
    pub fn device_messages(&self, device_id: &str) -> String {
        self.device(device_id, MESSAGES)
    }

    /// `<root>/<deviceId>/device-telemetry/metrics[/<appId>]`
    pub fn telemetry(&self, device_id: &str, app_id: Option<&str>) -> String {
        match app_id {
            Some(app) => format!("{}/{}", self.device(device_id, TELEMETRY_METRICS), app),
            None => self.device(device_id, TELEMETRY_METRICS),
        }
    }

    /// Classify an inbound topic.
    ///
    /// Device routes are purely syntactic here; whether the device id is
    /// registered is decided by the caller.
    pub fn classify<'a>(&self, topic: &'a str) -> Route<'a> {
        let Some(rest) = topic
            .strip_prefix(self.root.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return Route::Unrecognized;
        };

        if rest == DISCOVERY {
            return Route::Discovery;
        }

        if let Some(bridge_rest) = rest
            .strip_prefix(BRIDGE_SEGMENT)
            .and_then(|r| r.strip_prefix('/'))
        {
            return match bridge_rest.split_once('/') {
                Some((id, operation)) if id == self.bridge_id && !operation.is_empty() => {
                    Route::Bridge(operation)
                }
                _ => Route::Unrecognized,
            };
        }

        match rest.split_once('/') {
            Some((device_id, operation)) if !device_id.is_empty() && !operation.is_empty() => {
                Route::Device {
                    device_id,
                    operation,
                }
            }
            _ => Route::Unrecognized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Topics {
        Topics::new("dab", "b1")
    }

    #[test]
    fn test_builders() {
        let t = topics();
        assert_eq!(t.bridge("add-device"), "dab/bridge/b1/add-device");
        assert_eq!(t.bridge_filter(), "dab/bridge/b1/+");
        assert_eq!(t.discovery(), "dab/discovery");
        assert_eq!(t.messages(), "dab/messages");
        assert_eq!(
            t.device("device0", "system/settings/get"),
            "dab/device0/system/settings/get"
        );
        assert_eq!(t.device_filter("device0"), "dab/device0/#");
        assert_eq!(t.device_messages("device0"), "dab/device0/messages");
        assert_eq!(
            t.telemetry("device0", None),
            "dab/device0/device-telemetry/metrics"
        );
        assert_eq!(
            t.telemetry("device0", Some("Cobalt")),
            "dab/device0/device-telemetry/metrics/Cobalt"
        );
    }

    #[test]
    fn test_response_topic_is_per_request() {
        let a = response_topic("dab/device0/applications/list", "id-1");
        let b = response_topic("dab/device0/applications/list", "id-2");
        assert_eq!(a, "_response/dab/device0/applications/list/id-1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_base_topic() {
        assert_eq!(base_topic("dab/device0/applications/list"), "dab/device0/applications");
        assert_eq!(base_topic("dab"), "");
    }

    #[test]
    fn test_classify() {
        let t = topics();
        assert_eq!(t.classify("dab/bridge/b1/add-device"), Route::Bridge("add-device"));
        assert_eq!(t.classify("dab/bridge/other/add-device"), Route::Unrecognized);
        assert_eq!(t.classify("dab/bridge/b1"), Route::Unrecognized);
        assert_eq!(t.classify("dab/discovery"), Route::Discovery);
        assert_eq!(
            t.classify("dab/device0/system/settings/get"),
            Route::Device {
                device_id: "device0",
                operation: "system/settings/get"
            }
        );
        assert_eq!(t.classify("dab/device0"), Route::Unrecognized);
        assert_eq!(t.classify("dabble/device0/x"), Route::Unrecognized);
        assert_eq!(t.classify("_response/dab/device0/x/id"), Route::Unrecognized);
        assert_eq!(t.classify("other/topic"), Route::Unrecognized);
    }
}
