//! Worker definitions: which program runs for each step, and with what
//! arguments.
//!
//! Each step is backed by a script under the project root. Argument lists are
//! templates; `{niche}` and `{max_sites}` are filled from the run config.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::domain::{RunConfig, StepName};

/// Interpreter value meaning "execute the script directly"
pub const INTERPRETER_NONE: &str = "none";

/// Interpreter value meaning "project venv python if present, else python3"
pub const INTERPRETER_AUTO: &str = "auto";

/// How one step's worker is launched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Script path, relative to the project root unless absolute
    pub script: PathBuf,

    /// `auto` (default), `none`, or a program to run the script with
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Argument templates passed after the script
    #[serde(default)]
    pub args: Vec<String>,
}

impl WorkerSpec {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            interpreter: None,
            args: Vec::new(),
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Built-in worker for a step
    pub fn default_for(step: StepName) -> Self {
        match step {
            StepName::Discovery => {
                Self::new("scripts/discover_sites.py").with_args(["--niche", "{niche}"])
            }
            StepName::Verification => Self::new("scripts/verify_shopify.py"),
            StepName::Audit => Self::new("scripts/audit_homepage.py"),
            StepName::Analysis => Self::new("scripts/analyze_with_gemini.py"),
            StepName::Contacts => Self::new("scripts/extract_contacts.py"),
            StepName::Outreach => Self::new("scripts/generate_outreach.py"),
        }
    }
}

/// Step → worker mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCatalog {
    specs: BTreeMap<StepName, WorkerSpec>,
}

impl Default for WorkerCatalog {
    fn default() -> Self {
        Self {
            specs: StepName::ALL
                .iter()
                .map(|step| (*step, WorkerSpec::default_for(*step)))
                .collect(),
        }
    }
}

impl WorkerCatalog {
    /// Replace the built-in spec for every step present in `overrides`
    pub fn with_overrides(mut self, overrides: BTreeMap<StepName, WorkerSpec>) -> Self {
        self.specs.extend(overrides);
        self
    }

    pub fn with_spec(mut self, step: StepName, spec: WorkerSpec) -> Self {
        self.specs.insert(step, spec);
        self
    }

    pub fn spec(&self, step: StepName) -> WorkerSpec {
        self.specs
            .get(&step)
            .cloned()
            .unwrap_or_else(|| WorkerSpec::default_for(step))
    }

    /// Build the concrete command line for a step
    pub fn resolve(&self, step: StepName, config: &RunConfig, root: &Path) -> WorkerInvocation {
        let spec = self.spec(step);
        let worker_path = resolve_path(root, &spec.script);
        let expanded: Vec<String> = spec.args.iter().map(|a| expand_arg(a, config)).collect();

        let (program, args) = match spec.interpreter.as_deref() {
            Some(INTERPRETER_NONE) => (worker_path.clone(), expanded),
            Some(INTERPRETER_AUTO) | None => {
                let venv_python = root.join("venv").join("bin").join("python3");
                let python = if venv_python.exists() {
                    venv_python
                } else {
                    PathBuf::from("python3")
                };
                (python, with_script(&worker_path, expanded))
            }
            Some(program) => (PathBuf::from(program), with_script(&worker_path, expanded)),
        };

        WorkerInvocation {
            step,
            worker_path,
            program,
            args,
            working_dir: root.to_path_buf(),
        }
    }
}

fn with_script(script: &Path, args: Vec<String>) -> Vec<String> {
    std::iter::once(script.display().to_string())
        .chain(args)
        .collect()
}

fn expand_arg(template: &str, config: &RunConfig) -> String {
    template
        .replace("{niche}", &config.niche)
        .replace("{max_sites}", &config.max_sites.to_string())
}

fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// A fully resolved worker command for one step of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInvocation {
    pub step: StepName,

    /// The worker program whose presence decides run vs. skip
    pub worker_path: PathBuf,

    /// Executable actually spawned (interpreter, or the worker itself)
    pub program: PathBuf,

    pub args: Vec<String>,

    pub working_dir: PathBuf,
}

impl WorkerInvocation {
    /// Command with stdout/stderr piped, killed if dropped
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Shell-like rendering for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
