//! Scripted puzzles: levels with a start tree, a goal tree and the steps
//! that are supposed to turn one into the other.
//!
//! ```json
//! {
//!   "levels": [
//!     {
//!       "start": { "stack": [3, 1, 2] },
//!       "goal":  { "stack": [1, 2, 3] },
//!       "steps": [
//!         { "method": "sort", "args": [["stack"]], "id": "s1" }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Every step's first argument is a path (an array of field names and
//! indexes). `set` takes the new value as its second argument; `push` and
//! `unshift` take the items to add.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use gamepad::{Key, Levels, Request, StepHandler, StepOutcome, TrackedTree, FINISHED};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    pub levels: Vec<ScriptLevel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptLevel {
    pub start: Value,
    pub goal: Value,
    #[serde(default)]
    pub steps: Vec<Request>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid script {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let script: Script = serde_json::from_str(raw)?;
        if script.levels.is_empty() {
            bail!("a script needs at least one level");
        }
        Ok(script)
    }

    /// The start trees, one per level.
    pub fn starts(&self) -> Value {
        Value::Array(self.levels.iter().map(|level| level.start.clone()).collect())
    }

    /// Steps for the `n`th run. Runs past the last level repeat it.
    pub fn steps(&self, n: usize) -> &[Request] {
        match self.levels.get(n).or_else(|| self.levels.last()) {
            Some(level) => &level.steps,
            None => &[],
        }
    }

    pub fn goal(&self, level: usize) -> Option<&Value> {
        self.levels.get(level).map(|level| &level.goal)
    }
}

/// Applies tree edits on fresh steps and checks the goal at the end of
/// each level.
pub struct ScriptGame {
    script: Script,
    levels: Levels,
}

impl ScriptGame {
    pub fn new(script: Script, levels: Levels) -> Self {
        Self { script, levels }
    }

    fn check_goal(&self) -> StepOutcome {
        let index = self.levels.index();
        let reached = match (self.levels.level(), self.script.goal(index)) {
            (Some(level), Some(goal)) => &level == goal,
            _ => false,
        };
        if reached {
            info!(level = index, "level solved");
            StepOutcome::none()
        } else {
            warn!(level = index, "level failed");
            StepOutcome::Completed
        }
    }
}

#[async_trait]
impl StepHandler for ScriptGame {
    async fn manage(&self, request: &Request, _back: bool, replay: bool) -> Result<StepOutcome> {
        // The stores replay the tree on their own
        if replay {
            return Ok(StepOutcome::none());
        }
        if request.is(FINISHED) {
            return Ok(self.check_goal());
        }
        if request.is_lifecycle() {
            return Ok(StepOutcome::none());
        }

        let value = self
            .levels
            .with_store(|store| apply(store.tree_mut(), request))
            .unwrap_or(Ok(Value::Null))?;
        Ok(StepOutcome::Return(value))
    }
}

fn parse_path(arg: Option<&Value>) -> Result<Vec<Key>> {
    let Some(Value::Array(parts)) = arg else {
        bail!("the first argument must be a path array");
    };
    parts
        .iter()
        .map(|part| Key::from_value(part).ok_or_else(|| anyhow!("bad path segment {part}")))
        .collect()
}

/// Apply one edit step to `tree`. Returns what the edit removed, if
/// anything.
pub fn apply(tree: &mut TrackedTree, request: &Request) -> Result<Value> {
    let args = request.args();
    let path = parse_path(args.first())?;
    let rest = args.get(1..).unwrap_or_default().to_vec();

    let removed = match request.method() {
        "set" => {
            let value = rest
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("set needs a value"))?;
            tree.set_path(&path, value)?
        }
        "delete" => tree.delete_path(&path)?,
        method => {
            let id = tree.resolve(&path)?;
            match method {
                "push" => {
                    tree.push(id, rest)?;
                    None
                }
                "unshift" => {
                    tree.unshift(id, rest)?;
                    None
                }
                "pop" => tree.pop(id)?,
                "shift" => tree.shift(id)?,
                "reverse" => {
                    tree.reverse(id)?;
                    None
                }
                "sort" => {
                    tree.sort(id)?;
                    None
                }
                other => bail!("unknown step method {other:?}"),
            }
        }
    };
    Ok(removed.unwrap_or(Value::Null))
}
