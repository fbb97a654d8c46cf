//! The pipe registry: registration, wiring checks and resolution.

use super::definition::{ParallelOutput, PipeDefinition, PipeKind, SubPipe};
use crate::concepts::{ConceptRegistry, ConceptRequirement, ConceptSchema, Multiplicity};
use crate::errors::{
    CycleDetectedError, DuplicatePipeCodeError, InvalidWiringError, PipelexError,
    UnknownConceptError, UnknownPipeCodeError, UnknownStepHandlerError,
};
use crate::handlers::{HandlerRegistry, StepHandler};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::sync::{Arc, LazyLock};
use tracing::debug;

static PIPE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_]*$").expect("valid pipe code pattern"));

/// Registry of pipe definitions.
///
/// Atomic pipes are bound to their step handler at registration.
#[derive(Clone)]
pub struct PipeRegistry {
    pipes: HashMap<String, Arc<PipeDefinition>>,
    step_handlers: HashMap<String, Arc<dyn StepHandler>>,
    handlers: Arc<HandlerRegistry>,
}

impl PipeRegistry {
    /// Creates an empty registry resolving handler tags against `handlers`.
    #[must_use]
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            pipes: HashMap::new(),
            step_handlers: HashMap::new(),
            handlers,
        }
    }

    /// Registers a pipe after checking its local wiring.
    ///
    /// Checks that need other pipes (existence, concept compatibility of
    /// sub-pipe inputs, call cycles) run in [`validate_all`](Self::validate_all).
    pub fn register(&mut self, definition: PipeDefinition) -> Result<(), PipelexError> {
        let code = definition.code.clone();
        if !PIPE_CODE.is_match(&code) {
            return Err(InvalidWiringError::new(
                &code,
                "PIPE-INVALID-CODE",
                format!("'{code}' is not a valid pipe code"),
            )
            .into());
        }
        if self.pipes.contains_key(&code) {
            return Err(DuplicatePipeCodeError::new(&code).into());
        }

        check_local_wiring(&definition)?;

        if let PipeKind::Atomic { handler } = &definition.kind {
            let step = self.handlers.get(handler).ok_or_else(|| UnknownStepHandlerError {
                pipe_code: code.clone(),
                handler: handler.clone(),
            })?;
            self.step_handlers.insert(code.clone(), step);
        }

        debug!(pipe_code = %code, kind = definition.kind_name(), "Registered pipe");
        self.pipes.insert(code, Arc::new(definition));
        Ok(())
    }

    /// Resolves a pipe by code.
    pub fn resolve(&self, pipe_code: &str) -> Result<Arc<PipeDefinition>, UnknownPipeCodeError> {
        self.pipes
            .get(pipe_code)
            .cloned()
            .ok_or_else(|| UnknownPipeCodeError::new(pipe_code))
    }

    /// The step handler bound to an atomic pipe.
    #[must_use]
    pub fn step_handler(&self, pipe_code: &str) -> Option<Arc<dyn StepHandler>> {
        self.step_handlers.get(pipe_code).cloned()
    }

    /// Returns true if `pipe_code` is registered.
    #[must_use]
    pub fn contains(&self, pipe_code: &str) -> bool {
        self.pipes.contains_key(pipe_code)
    }

    /// Number of registered pipes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    /// Returns true if no pipes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    /// Registered pipe codes, sorted.
    #[must_use]
    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.pipes.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }

    /// Checks the whole registry against `concepts`.
    ///
    /// Every referenced concept and sub-pipe must exist, every sub-pipe input
    /// must be fed a compatible value, outputs must match their declaration
    /// and the pipe call graph must be acyclic.
    pub fn validate_all(&self, concepts: &ConceptRegistry) -> Result<(), PipelexError> {
        for code in self.codes() {
            let definition = &self.pipes[code];
            check_concepts(definition, concepts)?;
            for call in definition.kind.sub_pipes() {
                if !self.contains(&call.pipe_code) {
                    return Err(InvalidWiringError::new(
                        code,
                        "WIRING-DANGLING",
                        format!("sub-pipe '{}' is not registered", call.pipe_code),
                    )
                    .into());
                }
            }
        }

        self.detect_cycles().map_err(InvalidWiringError::from)?;

        for code in self.codes() {
            self.check_data_flow(&self.pipes[code], concepts)?;
        }
        Ok(())
    }

    fn check_data_flow(
        &self,
        definition: &PipeDefinition,
        concepts: &ConceptRegistry,
    ) -> Result<(), PipelexError> {
        let code = definition.code.as_str();
        let mut available: BTreeMap<&str, ConceptRequirement> = definition
            .inputs
            .iter()
            .map(|(name, req)| (name.as_str(), req.clone()))
            .collect();

        match &definition.kind {
            PipeKind::Atomic { .. } => Ok(()),
            PipeKind::Sequence { steps } => {
                let mut last = None;
                for step in steps {
                    let output = self.check_call(code, step, &available, None, concepts)?;
                    available.insert(step.result_name(), output.clone());
                    last = Some(output);
                }
                match last {
                    Some(output) => check_output(code, &output, &definition.output, concepts),
                    None => Ok(()),
                }
            }
            PipeKind::Parallel {
                branches,
                output_from,
            } => {
                let mut results = BTreeMap::new();
                for branch in branches {
                    let output = self.check_call(code, branch, &available, None, concepts)?;
                    results.insert(branch.result_name(), output);
                }
                match output_from {
                    ParallelOutput::Branch(name) => match results.get(name.as_str()) {
                        Some(output) => check_output(code, output, &definition.output, concepts),
                        None => Ok(()),
                    },
                    ParallelOutput::Combined => {
                        check_combined(code, &results, &definition.output, concepts)
                    }
                }
            }
            PipeKind::Batch {
                branch,
                input_list,
                input_item,
            } => {
                let Some(list) = available.remove(input_list.as_str()) else {
                    return Ok(());
                };
                let item = ConceptRequirement::single(list.concept);
                let output =
                    self.check_call(code, branch, &available, Some((input_item, &item)), concepts)?;
                if output.is_list() {
                    return Err(InvalidWiringError::new(
                        code,
                        "WIRING-BATCH",
                        format!("batch branch '{}' must produce a single value", branch.pipe_code),
                    )
                    .into());
                }
                check_output(
                    code,
                    &ConceptRequirement::list(output.concept),
                    &definition.output,
                    concepts,
                )
            }
        }
    }

    /// Checks that every input of the called pipe is fed a compatible value
    /// and returns the called pipe's output.
    fn check_call(
        &self,
        caller: &str,
        call: &SubPipe,
        available: &BTreeMap<&str, ConceptRequirement>,
        item: Option<(&String, &ConceptRequirement)>,
        concepts: &ConceptRegistry,
    ) -> Result<ConceptRequirement, PipelexError> {
        let callee = self.resolve(&call.pipe_code)?;

        if let Some(param) = call.input_map.keys().find(|p| !callee.inputs.contains_key(*p)) {
            return Err(InvalidWiringError::new(
                caller,
                "WIRING-UNDECLARED",
                format!(
                    "maps parameter '{param}' which '{}' does not declare",
                    callee.code
                ),
            )
            .into());
        }

        for (param, required) in &callee.inputs {
            let supplied = match item {
                Some((item_param, item_req)) if item_param == param => Some(item_req),
                _ => available.get(call.source_for(param)),
            };
            let Some(supplied) = supplied else {
                return Err(InvalidWiringError::new(
                    caller,
                    "WIRING-UNDECLARED",
                    format!(
                        "'{}' reads '{}' for parameter '{param}' but no such value is available",
                        callee.code,
                        call.source_for(param)
                    ),
                )
                .into());
            };
            if !concepts.is_requirement_compatible(supplied, required) {
                return Err(InvalidWiringError::new(
                    caller,
                    "WIRING-CONCEPT",
                    format!(
                        "parameter '{param}' of '{}' expects '{required}' but is fed '{supplied}'",
                        callee.code
                    ),
                )
                .into());
            }
        }

        if let Some((item_param, _)) = item {
            if !callee.inputs.contains_key(item_param) {
                return Err(InvalidWiringError::new(
                    caller,
                    "WIRING-BATCH",
                    format!("'{}' does not declare item parameter '{item_param}'", callee.code),
                )
                .into());
            }
        }

        Ok(callee.output.clone())
    }

    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for code in self.codes() {
            if !visited.contains(code) {
                if let Some(cycle) = self.dfs_cycle(code, &mut visited, &mut rec_stack, &mut path)
                {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }
        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(definition) = self.pipes.get(node) {
            for call in definition.kind.sub_pipes() {
                let callee = &call.pipe_code;
                if !visited.contains(callee) {
                    if let Some(cycle) = self.dfs_cycle(callee, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(callee) {
                    let start = path.iter().position(|n| n == callee).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(callee.clone());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }
}

impl Debug for PipeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeRegistry")
            .field("pipes", &self.codes())
            .field("handlers", &self.handlers)
            .finish()
    }
}

fn check_concepts(
    definition: &PipeDefinition,
    concepts: &ConceptRegistry,
) -> Result<(), PipelexError> {
    let referenced = definition
        .inputs
        .values()
        .chain(std::iter::once(&definition.output));
    for requirement in referenced {
        if !concepts.contains(&requirement.concept) {
            return Err(UnknownConceptError::new(&requirement.concept)
                .referenced_by(&definition.code)
                .into());
        }
    }
    Ok(())
}

fn check_output(
    code: &str,
    produced: &ConceptRequirement,
    declared: &ConceptRequirement,
    concepts: &ConceptRegistry,
) -> Result<(), PipelexError> {
    if concepts.is_requirement_compatible(produced, declared) {
        return Ok(());
    }
    Err(InvalidWiringError::new(
        code,
        "WIRING-CONCEPT",
        format!("declares output '{declared}' but its body produces '{produced}'"),
    )
    .into())
}

fn check_combined(
    code: &str,
    results: &BTreeMap<&str, ConceptRequirement>,
    declared: &ConceptRequirement,
    concepts: &ConceptRegistry,
) -> Result<(), PipelexError> {
    let invalid = |message: String| -> PipelexError {
        InvalidWiringError::new(code, "WIRING-OUTPUT", message).into()
    };
    if declared.multiplicity == Multiplicity::List {
        return Err(invalid(format!(
            "a combined output cannot be a list, got '{declared}'"
        )));
    }
    match concepts.effective_schema(&declared.concept) {
        None => Ok(()),
        Some(ConceptSchema::Structure { fields }) => {
            for (name, spec) in fields {
                match results.get(name.as_str()) {
                    Some(produced) if concepts.is_requirement_compatible(produced, &spec.concept) => {}
                    Some(produced) => {
                        return Err(invalid(format!(
                            "field '{name}' of '{declared}' expects '{}' but branch produces '{produced}'",
                            spec.concept
                        )))
                    }
                    None if spec.required => {
                        return Err(invalid(format!(
                            "no branch produces required field '{name}' of '{declared}'"
                        )))
                    }
                    None => {}
                }
            }
            if let Some(extra) = results.keys().find(|r| !fields.contains_key(**r)) {
                return Err(invalid(format!(
                    "branch result '{extra}' is not a field of '{declared}'"
                )));
            }
            Ok(())
        }
        Some(schema) => Err(invalid(format!(
            "a combined output needs a structured concept, '{declared}' is {}",
            schema.kind()
        ))),
    }
}

/// Checks the data flow of a composite pipe using only its own declaration.
fn check_local_wiring(definition: &PipeDefinition) -> Result<(), PipelexError> {
    let code = definition.code.as_str();
    let invalid = |rule: &str, message: String| -> PipelexError {
        InvalidWiringError::new(code, rule, message).into()
    };

    let calls = definition.kind.sub_pipes();
    if let Some(call) = calls.iter().find(|c| c.pipe_code == code) {
        return Err(invalid(
            "WIRING-CYCLE",
            format!("'{}' calls itself", call.pipe_code),
        ));
    }

    let mut produced: HashSet<&str> = HashSet::new();
    let mut results: HashSet<&str> = HashSet::new();
    for call in &calls {
        let result = call.result_name();
        if definition.inputs.contains_key(result) || !results.insert(result) {
            return Err(invalid(
                "WIRING-DUPLICATE-RESULT",
                format!("result name '{result}' is bound twice"),
            ));
        }
    }

    match &definition.kind {
        PipeKind::Atomic { .. } => Ok(()),
        PipeKind::Sequence { steps } => {
            if steps.is_empty() {
                return Err(invalid("PIPE-EMPTY", "sequence has no steps".to_string()));
            }
            for step in steps {
                for source in step.input_map.values() {
                    if !definition.inputs.contains_key(source) && !produced.contains(source.as_str()) {
                        let reason = if results.contains(source.as_str()) {
                            format!("step '{}' reads '{source}' before it is produced", step.pipe_code)
                        } else {
                            format!("step '{}' reads undeclared name '{source}'", step.pipe_code)
                        };
                        return Err(invalid("WIRING-UNDECLARED", reason));
                    }
                }
                produced.insert(step.result_name());
            }
            Ok(())
        }
        PipeKind::Parallel {
            branches,
            output_from,
        } => {
            if branches.is_empty() {
                return Err(invalid("PIPE-EMPTY", "parallel pipe has no branches".to_string()));
            }
            for branch in branches {
                for source in branch.input_map.values() {
                    if results.contains(source.as_str()) {
                        return Err(invalid(
                            "WIRING-UNDECLARED",
                            format!(
                                "branch '{}' reads sibling result '{source}'",
                                branch.pipe_code
                            ),
                        ));
                    }
                    if !definition.inputs.contains_key(source) {
                        return Err(invalid(
                            "WIRING-UNDECLARED",
                            format!("branch '{}' reads undeclared name '{source}'", branch.pipe_code),
                        ));
                    }
                }
            }
            if let ParallelOutput::Branch(name) = output_from {
                if !results.contains(name.as_str()) {
                    return Err(invalid(
                        "WIRING-OUTPUT",
                        format!("output designates unknown branch result '{name}'"),
                    ));
                }
            }
            Ok(())
        }
        PipeKind::Batch {
            branch,
            input_list,
            input_item,
        } => {
            match definition.inputs.get(input_list) {
                Some(list) if list.is_list() => {}
                Some(other) => {
                    return Err(invalid(
                        "WIRING-BATCH",
                        format!("batch input '{input_list}' must be a list, got '{other}'"),
                    ))
                }
                None => {
                    return Err(invalid(
                        "WIRING-BATCH",
                        format!("batch input '{input_list}' is not declared"),
                    ))
                }
            }
            if !definition.output.is_list() {
                return Err(invalid(
                    "WIRING-BATCH",
                    format!("batch output must be a list, got '{}'", definition.output),
                ));
            }
            if branch.input_map.contains_key(input_item) {
                return Err(invalid(
                    "WIRING-BATCH",
                    format!("item parameter '{input_item}' cannot also be mapped"),
                ));
            }
            for source in branch.input_map.values() {
                if source == input_list || !definition.inputs.contains_key(source) {
                    return Err(invalid(
                        "WIRING-UNDECLARED",
                        format!("batch branch reads undeclared name '{source}'"),
                    ));
                }
            }
            Ok(())
        }
    }
}
