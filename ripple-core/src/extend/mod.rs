//! Extenders
//!
//! Extenders adjust how a cell announces changes. They are plain data, so
//! they can be written in code or read from JSON configuration:
//!
//! ```json
//! { "rateLimit": { "timeout": 500, "method": "notifyWhenChangesStop" } }
//! { "throttle": 200 }
//! { "deferred": true }
//! { "notify": "always" }
//! ```
//!
//! Timeouts are milliseconds. `rateLimit` also accepts a bare number, which
//! means "notify at a fixed rate".
//!
//! Rate limiting, throttling and deferral all install the same kind of
//! gate on the cell's default channel; they differ only in the
//! [`NotificationPolicy`] that decides when the gate flushes.

pub(crate) mod limit;
pub mod policy;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use policy::{Debounce, Deferred, FixedRate, NotificationPolicy};

/// A notification adjustment applied to a cell with `extend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Extender {
    /// Notify once changes stop for the given quiet period.
    Throttle(#[serde(with = "millis")] Duration),
    /// Coalesce notifications with a timeout and method.
    RateLimit(RateLimit),
    /// Coalesce notifications until the next task drain. `false` is only
    /// accepted on a cell that was never deferred.
    Deferred(bool),
    /// Choose whether equal writes are announced.
    Notify(NotifyMode),
}

impl Extender {
    /// `{"throttle": ms}`
    pub fn throttle(timeout: Duration) -> Self {
        Self::Throttle(timeout)
    }

    /// `{"rateLimit": {"timeout": ms, "method": ...}}`
    pub fn rate_limit(timeout: Duration, method: RateLimitMethod) -> Self {
        Self::RateLimit(RateLimit { timeout, method })
    }

    /// `{"deferred": true}`
    pub fn deferred() -> Self {
        Self::Deferred(true)
    }

    /// `{"notify": "always"}`
    pub fn notify_always() -> Self {
        Self::Notify(NotifyMode::Always)
    }

    /// Parse every extender in a JSON object, in key order.
    ///
    /// `{"rateLimit": 100, "notify": "always"}` yields two extenders.
    pub fn parse_all(json: &str) -> serde_json::Result<Vec<Extender>> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)?;

        object
            .into_iter()
            .map(|(key, value)| {
                let mut single = serde_json::Map::with_capacity(1);
                single.insert(key, value);
                serde_json::from_value(serde_json::Value::Object(single))
            })
            .collect()
    }
}

/// Parameters of the `rateLimit` extender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RateLimitRepr", rename_all = "camelCase")]
pub struct RateLimit {
    #[serde(with = "millis")]
    pub timeout: Duration,
    pub method: RateLimitMethod,
}

/// When a rate-limited cell flushes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RateLimitMethod {
    /// First change starts a timer; the flush happens when it fires.
    #[default]
    NotifyAtFixedRate,
    /// Every change restarts the timer.
    NotifyWhenChangesStop,
}

/// Whether equal writes are announced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotifyMode {
    /// Announce every write, even when the value is equal.
    Always,
    /// Announce only writes the comparer considers different.
    #[default]
    Changed,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RateLimitRepr {
    Timeout(u64),
    Full {
        timeout: u64,
        #[serde(default)]
        method: RateLimitMethod,
    },
}

impl From<RateLimitRepr> for RateLimit {
    fn from(repr: RateLimitRepr) -> Self {
        match repr {
            RateLimitRepr::Timeout(ms) => Self {
                timeout: Duration::from_millis(ms),
                method: RateLimitMethod::default(),
            },
            RateLimitRepr::Full { timeout, method } => Self {
                timeout: Duration::from_millis(timeout),
                method,
            },
        }
    }
}

/// Durations as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rate_limit_object() {
        let ext: Extender =
            serde_json::from_str(r#"{"rateLimit":{"timeout":500,"method":"notifyWhenChangesStop"}}"#)
                .unwrap();
        assert_eq!(
            ext,
            Extender::rate_limit(Duration::from_millis(500), RateLimitMethod::NotifyWhenChangesStop)
        );
    }

    #[test]
    fn bare_rate_limit_defaults_to_fixed_rate() {
        let ext: Extender = serde_json::from_str(r#"{"rateLimit":100}"#).unwrap();
        assert_eq!(
            ext,
            Extender::rate_limit(Duration::from_millis(100), RateLimitMethod::NotifyAtFixedRate)
        );
    }

    #[test]
    fn parses_throttle_deferred_and_notify() {
        assert_eq!(
            serde_json::from_str::<Extender>(r#"{"throttle":200}"#).unwrap(),
            Extender::throttle(Duration::from_millis(200))
        );
        assert_eq!(
            serde_json::from_str::<Extender>(r#"{"deferred":true}"#).unwrap(),
            Extender::deferred()
        );
        assert_eq!(
            serde_json::from_str::<Extender>(r#"{"notify":"always"}"#).unwrap(),
            Extender::notify_always()
        );
    }

    #[test]
    fn serializes_timeouts_as_millis() {
        let json = serde_json::to_string(&Extender::throttle(Duration::from_millis(250))).unwrap();
        assert_eq!(json, r#"{"throttle":250}"#);

        let json = serde_json::to_value(Extender::rate_limit(
            Duration::from_millis(10),
            RateLimitMethod::NotifyAtFixedRate,
        ))
        .unwrap();
        assert_eq!(json["rateLimit"]["timeout"], 10);
        assert_eq!(json["rateLimit"]["method"], "notifyAtFixedRate");
    }

    #[test]
    fn parse_all_keeps_key_order() {
        let all = Extender::parse_all(r#"{"rateLimit":50,"notify":"always"}"#).unwrap();
        assert_eq!(
            all,
            vec![
                Extender::rate_limit(Duration::from_millis(50), RateLimitMethod::NotifyAtFixedRate),
                Extender::notify_always(),
            ]
        );
    }

    #[test]
    fn unknown_extender_is_rejected() {
        assert!(serde_json::from_str::<Extender>(r#"{"trackArrayChanges":true}"#).is_err());
    }
}
