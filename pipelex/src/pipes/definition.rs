//! Pipe definitions.

use crate::concepts::ConceptRequirement;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A call to another pipe from inside a composite pipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubPipe {
    /// Code of the called pipe.
    pub pipe_code: String,
    /// Name under which the output is stored. Defaults to the pipe code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Called-pipe parameter to caller-context name. Unlisted parameters are
    /// read under their own name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_map: BTreeMap<String, String>,
}

impl SubPipe {
    /// Calls `pipe_code` with identity wiring.
    #[must_use]
    pub fn new(pipe_code: impl Into<String>) -> Self {
        Self {
            pipe_code: pipe_code.into(),
            result: None,
            input_map: BTreeMap::new(),
        }
    }

    /// Stores the output under `name`.
    #[must_use]
    pub fn with_result(mut self, name: impl Into<String>) -> Self {
        self.result = Some(name.into());
        self
    }

    /// Feeds parameter `param` from context name `source`.
    #[must_use]
    pub fn with_input(mut self, param: impl Into<String>, source: impl Into<String>) -> Self {
        self.input_map.insert(param.into(), source.into());
        self
    }

    /// The name the output is stored under.
    #[must_use]
    pub fn result_name(&self) -> &str {
        self.result.as_deref().unwrap_or(&self.pipe_code)
    }

    /// The context name that feeds `param`.
    #[must_use]
    pub fn source_for<'a>(&'a self, param: &'a str) -> &'a str {
        self.input_map.get(param).map_or(param, String::as_str)
    }
}

/// How a parallel pipe designates its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelOutput {
    /// The result of the branch with this result name.
    Branch(String),
    /// A structured Stuff whose fields are the branch results.
    Combined,
}

/// Execution kind of a pipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipeKind {
    /// Delegates to the step handler registered under `handler`.
    Atomic {
        /// Handler tag.
        handler: String,
    },
    /// Runs steps in order; each step sees the results of earlier ones.
    Sequence {
        /// Ordered steps.
        steps: Vec<SubPipe>,
    },
    /// Runs branches concurrently against the same inputs.
    Parallel {
        /// Concurrent branches.
        branches: Vec<SubPipe>,
        /// Which result becomes the pipe output.
        output_from: ParallelOutput,
    },
    /// Runs `branch` once per item of the list input `input_list`.
    Batch {
        /// The pipe called per item.
        branch: SubPipe,
        /// Declared list input to iterate.
        input_list: String,
        /// Branch parameter that receives each item.
        input_item: String,
    },
}

impl PipeKind {
    /// Short name of the kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Atomic { .. } => "atomic",
            Self::Sequence { .. } => "sequence",
            Self::Parallel { .. } => "parallel",
            Self::Batch { .. } => "batch",
        }
    }

    /// Sub-pipe calls made by this kind, in declaration order.
    #[must_use]
    pub fn sub_pipes(&self) -> Vec<&SubPipe> {
        match self {
            Self::Atomic { .. } => Vec::new(),
            Self::Sequence { steps } => steps.iter().collect(),
            Self::Parallel { branches, .. } => branches.iter().collect(),
            Self::Batch { branch, .. } => vec![branch],
        }
    }
}

/// A registered unit of execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeDefinition {
    /// Unique pipe code.
    pub code: String,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input signature: parameter name to required concept.
    #[serde(default)]
    pub inputs: BTreeMap<String, ConceptRequirement>,
    /// Declared output.
    pub output: ConceptRequirement,
    /// Execution kind.
    #[serde(flatten)]
    pub kind: PipeKind,
}

impl PipeDefinition {
    /// Creates a definition with no inputs.
    #[must_use]
    pub fn new(
        code: impl Into<String>,
        output: impl Into<ConceptRequirement>,
        kind: PipeKind,
    ) -> Self {
        Self {
            code: code.into(),
            description: None,
            inputs: BTreeMap::new(),
            output: output.into(),
            kind,
        }
    }

    /// An atomic pipe backed by `handler`.
    #[must_use]
    pub fn atomic(
        code: impl Into<String>,
        handler: impl Into<String>,
        output: impl Into<ConceptRequirement>,
    ) -> Self {
        Self::new(
            code,
            output,
            PipeKind::Atomic {
                handler: handler.into(),
            },
        )
    }

    /// A sequence pipe.
    #[must_use]
    pub fn sequence(
        code: impl Into<String>,
        steps: Vec<SubPipe>,
        output: impl Into<ConceptRequirement>,
    ) -> Self {
        Self::new(code, output, PipeKind::Sequence { steps })
    }

    /// A parallel pipe.
    #[must_use]
    pub fn parallel(
        code: impl Into<String>,
        branches: Vec<SubPipe>,
        output_from: ParallelOutput,
        output: impl Into<ConceptRequirement>,
    ) -> Self {
        Self::new(
            code,
            output,
            PipeKind::Parallel {
                branches,
                output_from,
            },
        )
    }

    /// A batch pipe.
    #[must_use]
    pub fn batch(
        code: impl Into<String>,
        branch: SubPipe,
        input_list: impl Into<String>,
        input_item: impl Into<String>,
        output: impl Into<ConceptRequirement>,
    ) -> Self {
        Self::new(
            code,
            output,
            PipeKind::Batch {
                branch,
                input_list: input_list.into(),
                input_item: input_item.into(),
            },
        )
    }

    /// Declares an input.
    #[must_use]
    pub fn with_input(
        mut self,
        name: impl Into<String>,
        concept: impl Into<ConceptRequirement>,
    ) -> Self {
        self.inputs.insert(name.into(), concept.into());
        self
    }

    /// Adds a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Short name of the kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sub_pipe_defaults() {
        let call = SubPipe::new("summarize");
        assert_eq!(call.result_name(), "summarize");
        assert_eq!(call.source_for("text"), "text");

        let call = call.with_result("summary").with_input("text", "article");
        assert_eq!(call.result_name(), "summary");
        assert_eq!(call.source_for("text"), "article");
    }

    #[test]
    fn test_definition_serde_shape() {
        let def = PipeDefinition::sequence(
            "write_post",
            vec![SubPipe::new("draft"), SubPipe::new("polish").with_result("post")],
            "Text",
        )
        .with_input("topic", "Text");

        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["kind"], "sequence");
        assert_eq!(value["inputs"]["topic"], "Text");
        assert_eq!(value["steps"][1]["result"], "post");

        let back: PipeDefinition = serde_json::from_value(value).unwrap();
        assert_eq!(back, def);
    }

    #[test]
    fn test_parallel_deserialization() {
        let def: PipeDefinition = serde_json::from_value(serde_json::json!({
            "code": "compare",
            "inputs": {"text": "Text"},
            "output": "Comparison",
            "kind": "parallel",
            "branches": [{"pipe_code": "a"}, {"pipe_code": "b", "result": "second"}],
            "output_from": "combined"
        }))
        .unwrap();

        let PipeKind::Parallel { branches, output_from } = &def.kind else {
            panic!("expected a parallel pipe");
        };
        assert_eq!(branches[1].result_name(), "second");
        assert_eq!(*output_from, ParallelOutput::Combined);

        let designated: ParallelOutput =
            serde_json::from_value(serde_json::json!({"branch": "a"})).unwrap();
        assert_eq!(designated, ParallelOutput::Branch("a".to_string()));
    }

    #[test]
    fn test_kind_sub_pipes() {
        let def = PipeDefinition::batch("each", SubPipe::new("one"), "items", "item", "Text[]");
        assert_eq!(def.kind_name(), "batch");
        assert_eq!(def.kind.sub_pipes().len(), 1);
        assert!(PipeDefinition::atomic("a", "h", "Text").kind.sub_pipes().is_empty());
    }
}
