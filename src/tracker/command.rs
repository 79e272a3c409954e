use serde::Deserialize;

/// Body of an inbound request, either an HTTP POST or a websocket text message. All fields are
/// optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Command {
    #[serde(default, rename = "Mode", alias = "mode")]
    pub mode: String,
    #[serde(default, rename = "Work", alias = "work")]
    pub work: String,
    #[serde(default, rename = "Rest", alias = "rest")]
    pub rest: String,
}

/// What a [Command] asks the tracker to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action<'a> {
    PatchDurations { work: &'a str, rest: &'a str },
    ChangeMode(&'a str),
    Refresh,
}

impl Action<'_> {
    /// Refreshes don't change anything, so there is nothing to broadcast.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Action::Refresh)
    }
}

impl Command {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Duration corrections take precedence over mode changes.
    pub fn action(&self) -> Action<'_> {
        if !self.work.is_empty() || !self.rest.is_empty() {
            Action::PatchDurations {
                work: &self.work,
                rest: &self.rest,
            }
        } else if !self.mode.is_empty() {
            Action::ChangeMode(&self.mode)
        } else {
            Action::Refresh
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, Command};

    #[test]
    fn test_parse_mode_change() {
        let command = Command::parse(r#"{"Mode": "work"}"#).unwrap();
        assert_eq!(command.action(), Action::ChangeMode("work"));
    }

    #[test]
    fn test_patch_takes_precedence() {
        let command = Command::parse(r#"{"Mode": "rest", "Work": "+1m5s"}"#).unwrap();
        assert_eq!(
            command.action(),
            Action::PatchDurations {
                work: "+1m5s",
                rest: ""
            }
        );
    }

    #[test]
    fn test_lowercase_fields() {
        let command = Command::parse(r#"{"rest": "-25s"}"#).unwrap();
        assert_eq!(
            command.action(),
            Action::PatchDurations {
                work: "",
                rest: "-25s"
            }
        );
    }

    #[test]
    fn test_empty_is_refresh() {
        let command = Command::parse("{}").unwrap();
        assert_eq!(command.action(), Action::Refresh);
        assert!(!command.action().is_mutation());
    }

    #[test]
    fn test_malformed() {
        assert!(Command::parse(r#"{"Mode": "work", "Extra": 1}"#).is_err());
        assert!(Command::parse("not json").is_err());
        assert!(Command::parse(r#"{"Mode": 3}"#).is_err());
    }
}
