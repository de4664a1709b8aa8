//! JSON exporter for step-by-step inspection of a run.

use crate::error::SimResult;
use crate::world::{SimWorld, StepReport};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use swarmkern_core::BuildReport;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Step the frame was taken after
    pub step: u32,

    /// Agent state after the step
    pub agents: Vec<AgentSnapshot>,

    /// Outcome of the step's index build
    pub build: BuildReport,

    /// Newborns created during the step
    pub births: u32,

    /// Events (device errors, etc.)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

impl SimFrame {
    /// Captures the world after `report`'s step.
    pub fn capture(world: &SimWorld, report: &StepReport) -> SimResult<Self> {
        let agents = world
            .ids()?
            .into_iter()
            .zip(world.bins()?)
            .zip(world.values()?)
            .map(|((id, bin), value)| AgentSnapshot { id, bin, value })
            .collect();
        Ok(Self {
            step: report.step,
            agents,
            build: report.build,
            births: report.births,
            events: Vec::new(),
        })
    }
}

/// One agent in a frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: u32,
    pub bin: u32,
    pub value: f32,
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Steps recorded
    pub steps: u32,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Events not tied to a completed step
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,

    /// Final results
    pub passed: bool,

    /// Final value spread if applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_spread: Option<f32>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            steps: 0,
            frames: Vec::new(),
            events: Vec::new(),
            passed: false,
            final_spread: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.steps = frame.step + 1;
        self.frames.push(frame);
    }

    /// Records an event.
    pub fn add_event(&mut self, message: impl Into<String>, level: Option<&str>) {
        self.events.push(SimEvent {
            message: message.into(),
            level: level.map(str::to_string),
        });
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, spread: Option<f32>) {
        self.passed = passed;
        self.final_spread = spread;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> SimResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::SimConfig;

    #[test]
    fn test_export_captures_frames() {
        let mut world = SimWorld::new(SimConfig {
            agent_count: 4,
            parallel: false,
            ..Default::default()
        })
        .unwrap();
        let mut export = SimExport::new("ring_diffusion", 42);
        for _ in 0..3 {
            let report = world.step().unwrap();
            export.add_frame(SimFrame::capture(&world, &report).unwrap());
        }
        export.add_event("done", Some("info"));
        export.finalize(true, Some(0.5));

        assert_eq!(export.steps, 3);
        assert_eq!(export.frames[2].agents.len(), 4);
        assert_eq!(export.frames[0].agents[3].id, 4);

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&export).unwrap()).unwrap();
        assert_eq!(json["scenario"], "ring_diffusion");
        assert_eq!(json["frames"].as_array().unwrap().len(), 3);
        assert_eq!(json["frames"][0]["build"]["live"], 4);
        assert!(json["frames"][0].get("events").is_none());
    }
}
