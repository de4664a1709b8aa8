//! Scenarios exercising the runtime end to end.

use serde::{Deserialize, Serialize};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// SK-001: one agent per bin, diffusion conserves the total
    RingDiffusion,

    /// SK-002: two agents publish to the same bin
    WriteConflict,

    /// SK-003: more bins than agents, unclaimed bins are reported
    SparseGap,

    /// SK-004: windowed reads match the wrapped neighbourhood
    Neighbourhood,

    /// SK-005: concurrent agent output gets unique ids
    Births,

    /// SK-006: many threads fail in one launch, one detailed report
    ErrorStorm,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::RingDiffusion,
            ScenarioId::WriteConflict,
            ScenarioId::SparseGap,
            ScenarioId::Neighbourhood,
            ScenarioId::Births,
            ScenarioId::ErrorStorm,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::RingDiffusion => "ring_diffusion",
            ScenarioId::WriteConflict => "write_conflict",
            ScenarioId::SparseGap => "sparse_gap",
            ScenarioId::Neighbourhood => "neighbourhood",
            ScenarioId::Births => "births",
            ScenarioId::ErrorStorm => "error_storm",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::RingDiffusion => "Agents average their ring neighbours; total value is conserved, spread shrinks",
            ScenarioId::WriteConflict => "Two agents claim one bin; the build reports a collision and keeps one value",
            ScenarioId::SparseGap => "Message list longer than the population; every empty bin is reported",
            ScenarioId::Neighbourhood => "Filtered reads sum exactly the 2*radius wrapped neighbours",
            ScenarioId::Births => "Agents spawn newborns concurrently; every id is fresh and unique",
            ScenarioId::ErrorStorm => "A third of the agents publish out of range; one report counts them all",
        }
    }

    /// True if the scenario expects the runtime to report device errors.
    pub fn expects_device_errors(&self) -> bool {
        matches!(
            self,
            ScenarioId::WriteConflict | ScenarioId::SparseGap | ScenarioId::ErrorStorm
        )
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ring_diffusion" | "ringdiffusion" | "sk-001" => Ok(ScenarioId::RingDiffusion),
            "write_conflict" | "writeconflict" | "sk-002" => Ok(ScenarioId::WriteConflict),
            "sparse_gap" | "sparsegap" | "sk-003" => Ok(ScenarioId::SparseGap),
            "neighbourhood" | "neighborhood" | "sk-004" => Ok(ScenarioId::Neighbourhood),
            "births" | "sk-005" => Ok(ScenarioId::Births),
            "error_storm" | "errorstorm" | "sk-006" => Ok(ScenarioId::ErrorStorm),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert!(!scenario.description().is_empty());
        }
        assert_eq!("SK-004".parse::<ScenarioId>(), Ok(ScenarioId::Neighbourhood));
        assert!("nope".parse::<ScenarioId>().is_err());
    }
}
