//! Analyzer name to script lookup

use djlm_common::config::AnalysisConfig;
use djlm_common::models::{AnalysisJob, AnalyzerKind};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{AnalysisError, EngineResult};

/// Script file shipped for each analyzer
pub fn default_script_name(kind: AnalyzerKind) -> &'static str {
    match kind {
        AnalyzerKind::Tempo => "tempo_worker.py",
        AnalyzerKind::Key => "key_worker.py",
        AnalyzerKind::Energy => "energy_worker.py",
        AnalyzerKind::Metadata => "metadata_worker.py",
        AnalyzerKind::Duplicate => "duplicate_detector.py",
    }
}

/// Fixed lookup table from analyzer name to script path
#[derive(Debug, Clone)]
pub struct ScriptTable {
    workers_dir: PathBuf,
    interpreter: Option<String>,
    scripts: HashMap<String, PathBuf>,
}

impl ScriptTable {
    /// Table with the built-in scripts under `workers_dir`
    pub fn new(workers_dir: impl Into<PathBuf>, interpreter: Option<String>) -> Self {
        let workers_dir = workers_dir.into();
        let scripts = AnalyzerKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    kind.as_str().to_string(),
                    workers_dir.join(default_script_name(kind)),
                )
            })
            .collect();

        Self {
            workers_dir,
            interpreter,
            scripts,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.workers_dir.clone(), config.interpreter.clone())
    }

    /// Map `analyzer` to `script` (relative paths resolve against the workers directory)
    pub fn with_script(mut self, analyzer: impl Into<String>, script: impl AsRef<Path>) -> Self {
        let path = self.workers_dir.join(script.as_ref());
        self.scripts.insert(analyzer.into(), path);
        self
    }

    pub fn workers_dir(&self) -> &Path {
        &self.workers_dir
    }

    pub fn interpreter(&self) -> Option<&str> {
        self.interpreter.as_deref()
    }

    /// Script for `analyzer`, if known
    pub fn resolve(&self, analyzer: &str) -> Option<&Path> {
        self.scripts.get(analyzer).map(PathBuf::as_path)
    }

    /// Build the process command for `job`
    ///
    /// `[interpreter] <script> --audio-path <path> --parameters <json> --job-id <id>`
    pub fn command_for(&self, job: &AnalysisJob) -> EngineResult<Command> {
        let script = self
            .resolve(&job.analyzer)
            .ok_or_else(|| AnalysisError::UnknownAnalyzer(job.analyzer.clone()))?;

        let mut command = match &self.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(script);
                command
            }
            None => Command::new(script),
        };

        let parameters = Value::Object(job.parameters.clone()).to_string();

        command
            .arg("--audio-path")
            .arg(&job.audio_path)
            .arg("--parameters")
            .arg(parameters)
            .arg("--job-id")
            .arg(job.id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(command)
    }
}
