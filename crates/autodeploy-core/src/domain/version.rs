//! Version labels and agent names.

use std::sync::Mutex;

use autodeploy_state::{ArtifactRef, VersionLabel};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Which timestamp a version label is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    /// Registry push time of the resolved image. Redelivered events map to
    /// the same label, so a duplicate run adopts the existing agent.
    #[default]
    PublishTime,
    /// Wall-clock time when the event is handled.
    InvocationTime,
}

/// Source of "now" for labels and record timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Derive the version label for a deployment of `artifact`.
pub fn derive_version(
    source: LabelSource,
    artifact: &ArtifactRef,
    clock: &dyn Clock,
) -> VersionLabel {
    match source {
        LabelSource::PublishTime => VersionLabel::from_timestamp(artifact.pushed_at),
        LabelSource::InvocationTime => VersionLabel::from_timestamp(clock.now()),
    }
}

/// Agent name for a version label (`<prefix><label>`).
pub fn agent_name(prefix: &str, version: &VersionLabel) -> String {
    format!("{}{}", prefix, version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodeploy_state::ImageDigest;
    use chrono::TimeZone;

    fn artifact() -> ArtifactRef {
        ArtifactRef {
            repository: "agent-core-tools".to_string(),
            registry_id: "123456789012".to_string(),
            digest: ImageDigest::parse("sha256:abc").unwrap(),
            tags: vec![],
            pushed_at: Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap(),
        }
    }

    #[test]
    fn publish_time_label_ignores_clock() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
        let label = derive_version(LabelSource::PublishTime, &artifact(), &clock);
        assert_eq!(label.as_str(), "20240305-070809");

        clock.advance(Duration::hours(5));
        assert_eq!(
            derive_version(LabelSource::PublishTime, &artifact(), &clock),
            label
        );
    }

    #[test]
    fn invocation_time_label_follows_clock() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
        let label = derive_version(LabelSource::InvocationTime, &artifact(), &clock);
        assert_eq!(label.as_str(), "20300101-000000");
    }

    #[test]
    fn agent_name_prefixes_label() {
        let label = VersionLabel::parse("20240305-070809").unwrap();
        assert_eq!(agent_name("agent-core-", &label), "agent-core-20240305-070809");
    }
}
