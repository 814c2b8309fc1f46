//! JSON recorder for episode replays.
//!
//! Every tick is written as `<step:03>.json` into the episode directory. At
//! the end of the episode the frames are merged into a single
//! `game_state.json` and the per-frame files are removed.

use arena_env::{EnvError, EpisodeInfo, Recorder, StepSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the merged record.
pub const MERGED_FILE: &str = "game_state.json";

/// Result as it appears in a merged record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResult {
    pub name: String,
    pub id: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub winners: Vec<usize>,
}

/// Complete episode record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeRecord {
    /// Agent descriptors in slot order
    pub agents: Vec<String>,

    /// RFC 3339 timestamp of the end of the episode
    pub finished_at: String,

    /// Simulation configuration id
    pub config: String,

    /// Final result
    pub result: RecordedResult,

    /// Every frame, in step order
    pub state: Vec<Value>,
}

/// Recorder writing pretty JSON files.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRecorder;

impl JsonRecorder {
    pub fn new() -> Self {
        Self
    }

    fn frame_path(dir: &Path, step: u64) -> PathBuf {
        dir.join(format!("{:03}.json", step))
    }

    /// Frame files in `dir`, sorted by step.
    fn frame_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>, EnvError> {
        let entries = std::fs::read_dir(dir).map_err(|e| EnvError::storage(dir, e))?;
        let mut frames = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| EnvError::storage(dir, e))?.path();
            let step = path
                .extension()
                .filter(|ext| *ext == "json")
                .and_then(|_| path.file_stem())
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok());
            if let Some(step) = step {
                frames.push((step, path));
            }
        }
        frames.sort_by_key(|(step, _)| *step);
        Ok(frames)
    }

    fn write_json(path: &Path, value: &impl Serialize) -> Result<(), EnvError> {
        let json =
            serde_json::to_string_pretty(value).map_err(|e| EnvError::SerializationError(e.to_string()))?;
        let mut file = File::create(path).map_err(|e| EnvError::storage(path, e))?;
        file.write_all(json.as_bytes())
            .map_err(|e| EnvError::storage(path, e))
    }
}

impl Recorder for JsonRecorder {
    fn persist_frame(&self, dir: &Path, snapshot: &StepSnapshot) -> Result<(), EnvError> {
        let path = Self::frame_path(dir, snapshot.step_count);
        Self::write_json(&path, &snapshot.state)?;
        debug!("Persisted frame {}", path.display());
        Ok(())
    }

    fn merge_episode(
        &self,
        dir: &Path,
        agents: &[String],
        finished_at: &str,
        config_id: &str,
        info: &EpisodeInfo,
    ) -> Result<(), EnvError> {
        let frames = Self::frame_files(dir)?;

        let mut state = Vec::with_capacity(frames.len());
        for (_, path) in &frames {
            let text = std::fs::read_to_string(path).map_err(|e| EnvError::storage(path, e))?;
            let frame: Value =
                serde_json::from_str(&text).map_err(|e| EnvError::SerializationError(e.to_string()))?;
            state.push(frame);
        }

        let record = EpisodeRecord {
            agents: agents.to_vec(),
            finished_at: finished_at.to_string(),
            config: config_id.to_string(),
            result: RecordedResult {
                name: format!("{:?}", info.result),
                id: info.result.id(),
                winners: info.winners.iter().map(|w| w.index()).collect(),
            },
            state,
        };
        Self::write_json(&dir.join(MERGED_FILE), &record)?;

        for (_, path) in &frames {
            std::fs::remove_file(path).map_err(|e| EnvError::storage(path, e))?;
        }

        info!(
            "Merged {} frames into {}",
            record.state.len(),
            dir.join(MERGED_FILE).display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_env::{AgentId, GameResult};
    use serde_json::json;

    fn snapshot(step: u64) -> StepSnapshot {
        StepSnapshot {
            step_count: step,
            state: json!({ "step_count": step }),
            observations: vec![],
            rewards: vec![],
            done: false,
            info: EpisodeInfo::incomplete(step),
        }
    }

    #[test]
    fn test_merge_orders_frames_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = JsonRecorder::new();

        // Written out of order, including a three-digit step
        for step in [2, 0, 100, 1] {
            recorder.persist_frame(dir.path(), &snapshot(step)).unwrap();
        }
        assert!(dir.path().join("002.json").exists());
        assert!(dir.path().join("100.json").exists());

        let info = EpisodeInfo {
            result: GameResult::Win,
            winners: vec![AgentId(3)],
            step_count: 100,
        };
        recorder
            .merge_episode(
                dir.path(),
                &["simple::".to_string(), "random::".to_string()],
                "2024-01-01T00:00:00.000Z",
                "ArenaFFA-v0",
                &info,
            )
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join(MERGED_FILE)).unwrap();
        let record: EpisodeRecord = serde_json::from_str(&text).unwrap();
        let steps: Vec<u64> = record
            .state
            .iter()
            .map(|f| f["step_count"].as_u64().unwrap())
            .collect();
        assert_eq!(steps, vec![0, 1, 2, 100]);
        assert_eq!(record.config, "ArenaFFA-v0");
        assert_eq!(
            record.result,
            RecordedResult { name: "Win".to_string(), id: 0, winners: vec![3] }
        );

        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_missing_directory_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");

        let err = JsonRecorder.persist_frame(&missing, &snapshot(0)).unwrap_err();
        assert!(matches!(err, EnvError::Storage { .. }));

        let err = JsonRecorder
            .merge_episode(&missing, &[], "now", "ArenaDuel-v0", &EpisodeInfo::incomplete(0))
            .unwrap_err();
        assert!(matches!(err, EnvError::Storage { .. }));
    }
}
