//! Hub message types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named method call with positional arguments.
///
/// Used in both directions: the client invokes hub methods
/// (`SubscribeToSession(42)`), and the hub invokes client methods to push
/// events (`ScoreUpdated({...})`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubInvocation {
    /// Method name.
    pub target: String,

    /// Positional arguments.
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl HubInvocation {
    /// Creates an invocation with no arguments.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            arguments: Vec::new(),
        }
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn with_argument(mut self, argument: impl Into<Value>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    /// Returns the first argument, which carries the payload of push events.
    pub fn first_argument(&self) -> Option<&Value> {
        self.arguments.first()
    }
}
