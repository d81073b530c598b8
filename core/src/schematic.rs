use serde::{Deserialize, Serialize};
use std::fmt;

/// Debug view of a rendered workflow tree, produced alongside each rendering.
///
/// `WorkflowSchematic` mirrors the live node hierarchy for one render pass.
/// It is used for visualization and for assertions in tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkflowSchematic {
    pub workflow_id: u64,
    pub workflow_type: String,
    pub key: String,
    pub workers: Vec<WorkerSchematic>,
    pub children: Vec<WorkflowSchematic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSchematic {
    pub worker_id: u64,
    pub key: String,
    pub description: String,
    pub finished: bool,
}

impl WorkflowSchematic {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Finds a descendant by a path of `(short type, key)` steps.
    pub fn find(&self, path: &[(&str, &str)]) -> Option<&WorkflowSchematic> {
        let Some(((workflow_type, key), rest)) = path.split_first() else {
            return Some(self);
        };
        self.children
            .iter()
            .find(|child| child.workflow_type == *workflow_type && child.key == *key)
            .and_then(|child| child.find(rest))
    }

    /// Total number of workflows in this tree, including the root.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(WorkflowSchematic::node_count).sum::<usize>()
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        write!(f, "{pad}{}", self.workflow_type)?;
        if !self.key.is_empty() {
            write!(f, " [{}]", self.key)?;
        }
        writeln!(f, " #{}", self.workflow_id)?;
        for worker in &self.workers {
            let status = if worker.finished { " (finished)" } else { "" };
            writeln!(f, "{pad}  ~ {} [{}]{status}", worker.description, worker.key)?;
        }
        for child in &self.children {
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for WorkflowSchematic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}
