//! Step domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// One external command of an execution, in the order steps run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Clone,
    Checkout,
    Build,
    Test,
    Deploy,
}

impl StepKind {
    /// Fixed step order. Steps never run out of this order.
    pub const SEQUENCE: [StepKind; 5] = [
        StepKind::Clone,
        StepKind::Checkout,
        StepKind::Build,
        StepKind::Test,
        StepKind::Deploy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Clone => "clone",
            StepKind::Checkout => "checkout",
            StepKind::Build => "build",
            StepKind::Test => "test",
            StepKind::Deploy => "deploy",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
