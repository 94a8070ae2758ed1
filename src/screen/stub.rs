// Scripted screen for tests and dry runs.
//
// Flags any text containing one of its markers (case-insensitive substring)
// and records every text it was asked about, so tests can assert which stages
// ran. It can also be told to fail or panic on every call.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::traits::ContentScreen;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Behavior {
    Match,
    Fail,
    Panic,
}

pub struct StubScreen {
    markers: Vec<String>,
    behavior: Behavior,
    calls: Mutex<Vec<String>>,
}

impl StubScreen {
    /// A screen that flags text containing any of `markers`.
    pub fn flagging<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.into().to_lowercase())
                .collect(),
            behavior: Behavior::Match,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A screen that flags nothing.
    pub fn clean() -> Self {
        Self::flagging(Vec::<String>::new())
    }

    /// A screen whose every call returns an error.
    pub fn failing() -> Self {
        Self {
            behavior: Behavior::Fail,
            ..Self::clean()
        }
    }

    /// A screen whose every call panics.
    pub fn panicking() -> Self {
        Self {
            behavior: Behavior::Panic,
            ..Self::clean()
        }
    }

    /// Texts screened so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl ContentScreen for StubScreen {
    async fn is_flagged(&self, text: &str) -> Result<bool> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());

        match self.behavior {
            Behavior::Fail => anyhow::bail!("stub screen backend unavailable"),
            Behavior::Panic => panic!("stub screen panicked"),
            Behavior::Match => {
                let lower = text.to_lowercase();
                Ok(self.markers.iter().any(|m| lower.contains(m.as_str())))
            }
        }
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
