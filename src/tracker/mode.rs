use std::{fmt::Display, str::FromStr};

use anyhow::anyhow;

/// One of the mutually exclusive modes time can be spent in. `Off` is the initial mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Mode {
    Work = 0,
    Rest = 1,
    #[default]
    Off = 2,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Work => "work",
            Mode::Rest => "rest",
            Mode::Off => "off",
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "work" => Ok(Mode::Work),
            "rest" => Ok(Mode::Rest),
            "off" => Ok(Mode::Off),
            _ => Err(anyhow!("Unknown mode {s:?}")),
        }
    }
}
