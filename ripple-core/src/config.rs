//! Engine Options
//!
//! Process-wide switches are held per thread, since every reactive cell is
//! bound to the thread that created it. Options only affect cells created
//! after they are set.
//!
//! Options can be built in code or loaded from JSON:
//!
//! ```json
//! { "deferUpdates": true }
//! ```

use std::cell::Cell;

use serde::{Deserialize, Serialize};

/// Global engine options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    /// Apply the `deferred` extender to every new observable and computed.
    pub defer_updates: bool,
}

impl Options {
    /// Parse options from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

thread_local! {
    static OPTIONS: Cell<Options> = const { Cell::new(Options { defer_updates: false }) };
}

/// The options in effect on this thread.
pub fn options() -> Options {
    OPTIONS.with(|options| options.get())
}

/// Replace the options for this thread and return the previous ones.
pub fn set_options(options: Options) -> Options {
    tracing::debug!(?options, "engine options updated");
    OPTIONS.with(|current| current.replace(options))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_keys() {
        let options = Options::from_json(r#"{"deferUpdates": true}"#).unwrap();
        assert!(options.defer_updates);
    }

    #[test]
    fn missing_keys_use_defaults() {
        assert_eq!(Options::from_json("{}").unwrap(), Options::default());
    }

    #[test]
    fn set_options_returns_previous() {
        let previous = set_options(Options { defer_updates: true });
        assert!(!previous.defer_updates);
        assert!(options().defer_updates);

        set_options(previous);
        assert!(!options().defer_updates);
    }
}
