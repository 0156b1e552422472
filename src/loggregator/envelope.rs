use std::collections::{BTreeMap, HashMap};

use time::OffsetDateTime;

use crate::loggregator::proto::{envelope, log, Envelope, Log};

pub const LABEL_APP_GUID: &str = "cloudfoundry.org/app_guid";
pub const LABEL_SOURCE_TYPE: &str = "cloudfoundry.org/source_type";
pub const DEFAULT_SOURCE_TYPE: &str = "APP";

/// Identity attached to every envelope of one container.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LoggregatorAppMeta {
    pub source_id: String,
    pub instance_id: String,
    pub source_type: String,
    pub pod_name: String,
    pub namespace: String,
    pub container: String,
    pub cluster: String,
}

impl LoggregatorAppMeta {
    /// Derives metadata for `container` from the pod's name and labels.
    pub fn for_container(
        namespace: &str,
        pod_name: &str,
        labels: &BTreeMap<String, String>,
        container: &str,
        cluster: &str,
    ) -> Self {
        let source_id = labels
            .get(LABEL_APP_GUID)
            .cloned()
            .unwrap_or_else(|| pod_name.to_string());
        let source_type = labels
            .get(LABEL_SOURCE_TYPE)
            .cloned()
            .unwrap_or_else(|| DEFAULT_SOURCE_TYPE.to_string());

        Self {
            source_id,
            instance_id: instance_index(pod_name),
            source_type,
            pod_name: pod_name.to_string(),
            namespace: namespace.to_string(),
            container: container.to_string(),
            cluster: cluster.to_string(),
        }
    }

    /// Wraps one log line into a tagged `LOG_OUT` envelope stamped with the
    /// current time.
    pub fn envelope(&self, message: &[u8]) -> Envelope {
        let timestamp = i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos())
            .unwrap_or(i64::MAX);

        Envelope {
            timestamp,
            source_id: self.source_id.clone(),
            instance_id: self.instance_id.clone(),
            tags: self.tags(),
            message: Some(envelope::Message::Log(Log {
                payload: message.to_vec(),
                r#type: log::Type::Out as i32,
            })),
        }
    }

    fn tags(&self) -> HashMap<String, String> {
        HashMap::from([
            ("source_type".to_string(), self.source_type.clone()),
            ("pod_name".to_string(), self.pod_name.clone()),
            ("namespace".to_string(), self.namespace.clone()),
            ("container".to_string(), self.container.clone()),
            ("cluster".to_string(), self.cluster.clone()),
        ])
    }
}

/// StatefulSet pods end in `-<ordinal>`; anything else is instance 0.
fn instance_index(pod_name: &str) -> String {
    match pod_name.rsplit_once('-') {
        Some((_, suffix)) if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) => {
            suffix.to_string()
        }
        _ => "0".to_string(),
    }
}
