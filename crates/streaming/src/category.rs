use std::fmt;

use serde::{Deserialize, Serialize};

/// Lower bounds (m³/s) of `Low`, `Moderate`, `High`, `VeryHigh` and `Extreme`.
pub const FLOW_THRESHOLDS_CMS: [f64; 5] = [1.0, 10.0, 50.0, 200.0, 1000.0];

/// Ordered streamflow buckets used for styling. Declaration order is severity
/// order, so `Ord` compares severity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowCategory {
    VeryLow,
    Low,
    Moderate,
    High,
    VeryHigh,
    Extreme,
}

impl FlowCategory {
    pub const ALL: [FlowCategory; 6] = [
        FlowCategory::VeryLow,
        FlowCategory::Low,
        FlowCategory::Moderate,
        FlowCategory::High,
        FlowCategory::VeryHigh,
        FlowCategory::Extreme,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FlowCategory::VeryLow => "very_low",
            FlowCategory::Low => "low",
            FlowCategory::Moderate => "moderate",
            FlowCategory::High => "high",
            FlowCategory::VeryHigh => "very_high",
            FlowCategory::Extreme => "extreme",
        }
    }
}

impl fmt::Display for FlowCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a flow rate in m³/s to its category.
///
/// Total over every `f64`: zero, negative and NaN flows are `VeryLow`.
pub fn categorize(flow_cms: f64) -> FlowCategory {
    let bucket = FLOW_THRESHOLDS_CMS
        .iter()
        .take_while(|t| flow_cms >= **t)
        .count();
    FlowCategory::ALL[bucket]
}
