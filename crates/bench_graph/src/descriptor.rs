//! Pipeline Descriptor
//!
//! A [`PipelineDescriptor`] is the declarative topology of one benchmark run:
//! named stages, directed edges from stage outputs to stage inputs, and
//! exactly one terminal output marked for readback.
//!
//! The descriptor validates eagerly. Every mutation checks its own
//! invariants, so a descriptor that exists is always well formed except for
//! the terminal output, which [`validate`](PipelineDescriptor::validate)
//! checks once wiring is complete:
//!
//! - stage names are unique
//! - edges reference existing stages and channels declared by their type
//! - each consumer input is fed by at most one edge
//! - the edge set is acyclic
//!
//! A descriptor owns no engine resources; the run controller instantiates it
//! on the host and releases the host-side objects at run end.

use std::fmt;
use std::str::FromStr;

use bench_core::{EvalError, Result};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::stage::{StageConfig, StageKind};

// ─── Channel References ───────────────────────────────────────────────────────

/// Reference to a named channel of a stage, written `"Stage.channel"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelRef {
    pub stage: String,
    pub channel: String,
}

impl ChannelRef {
    #[must_use]
    pub fn new(stage: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stage, self.channel)
    }
}

impl FromStr for ChannelRef {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((stage, channel)) if !stage.is_empty() && !channel.is_empty() => {
                Ok(Self::new(stage, channel))
            }
            _ => Err(EvalError::InvalidChannelRef(s.to_owned())),
        }
    }
}

/// Directed data dependency from a producer output to a consumer input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: ChannelRef,
    pub to: ChannelRef,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

// ─── Stages ───────────────────────────────────────────────────────────────────

/// Index of a stage within its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(u32);

impl StageId {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A named, configured processing unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    name: String,
    config: StageConfig,
}

impl Stage {
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> StageKind {
        self.config.kind()
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &StageConfig {
        &self.config
    }
}

// ─── Descriptor ───────────────────────────────────────────────────────────────

/// Declarative pipeline topology: stages, edges and one terminal output.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDescriptor {
    name: String,
    stages: Vec<Stage>,
    index: FxHashMap<String, StageId>,
    edges: Vec<Edge>,
    terminal_output: Option<ChannelRef>,
}

impl PipelineDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            index: FxHashMap::default(),
            edges: Vec::new(),
            terminal_output: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a stage. Names must be unique within the descriptor.
    pub fn add_stage(&mut self, name: impl Into<String>, config: StageConfig) -> Result<StageId> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(EvalError::DuplicateStage(name));
        }
        let id = StageId(self.stages.len() as u32);
        self.index.insert(name.clone(), id);
        self.stages.push(Stage { name, config });
        Ok(id)
    }

    /// Adds an edge from textual references, e.g.
    /// `add_edge("VBufferRT.vbuffer", "ComputePathTracer.vbuffer")`.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        self.connect(from.parse()?, to.parse()?)
    }

    /// Adds an edge after checking stages, channels, fan-in and acyclicity.
    pub fn connect(&mut self, from: ChannelRef, to: ChannelRef) -> Result<()> {
        let producer = self.require_stage(&from.stage)?;
        let consumer = self.require_stage(&to.stage)?;

        if !self.stages[producer.index()].kind().has_output(&from.channel) {
            return Err(EvalError::UnknownChannel {
                stage: from.stage,
                channel: from.channel,
                direction: "output",
            });
        }
        if !self.stages[consumer.index()].kind().has_input(&to.channel) {
            return Err(EvalError::UnknownChannel {
                stage: to.stage,
                channel: to.channel,
                direction: "input",
            });
        }
        if producer == consumer {
            return Err(EvalError::SelfEdge(Edge { from, to }.to_string()));
        }
        if self.edges.iter().any(|e| e.to == to) {
            return Err(EvalError::InputAlreadyConnected(to.to_string()));
        }
        // The new edge closes a cycle iff the producer is already reachable
        // from the consumer.
        if self.reaches(consumer, producer) {
            return Err(EvalError::CycleDetected {
                stages: vec![from.stage, to.stage],
            });
        }

        self.edges.push(Edge { from, to });
        Ok(())
    }

    /// Marks the single terminal output, replacing any previous one.
    pub fn mark_output(&mut self, output: &str) -> Result<()> {
        let output: ChannelRef = output.parse()?;
        let id = self.require_stage(&output.stage)?;
        if !self.stages[id.index()].kind().has_output(&output.channel) {
            return Err(EvalError::UnknownChannel {
                stage: output.stage,
                channel: output.channel,
                direction: "output",
            });
        }
        if let Some(previous) = self.terminal_output.replace(output) {
            log::debug!("Pipeline '{}': terminal output {} replaced", self.name, previous);
        }
        Ok(())
    }

    /// Checks the invariants that can only be judged on a complete descriptor.
    pub fn validate(&self) -> Result<()> {
        if self.terminal_output.is_none() {
            return Err(EvalError::MissingTerminalOutput(self.name.clone()));
        }
        self.execution_order().map(|_| ())
    }

    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    #[must_use]
    pub fn terminal_output(&self) -> Option<&ChannelRef> {
        self.terminal_output.as_ref()
    }

    #[must_use]
    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.get(id.index())
    }

    #[must_use]
    pub fn stage_id(&self, name: &str) -> Option<StageId> {
        self.index.get(name).copied()
    }

    #[must_use]
    pub fn stage_by_name(&self, name: &str) -> Option<&Stage> {
        self.stage_id(name).and_then(|id| self.stage(id))
    }

    /// Stages whose type integrates results over multiple steps.
    pub fn accumulating_stages(&self) -> impl Iterator<Item = StageId> + '_ {
        self.stages
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind().accumulates())
            .map(|(i, _)| StageId(i as u32))
    }

    /// Edges feeding the inputs of `id`.
    pub fn inputs_of(&self, id: StageId) -> impl Iterator<Item = &Edge> + '_ {
        let name = self.stages.get(id.index()).map(Stage::name);
        self.edges
            .iter()
            .filter(move |e| Some(e.to.stage.as_str()) == name)
    }

    /// Deterministic topological order of all stages.
    ///
    /// Kahn's algorithm; among ready stages the one added first runs first,
    /// so identical descriptors always yield identical orders.
    pub fn execution_order(&self) -> Result<Vec<StageId>> {
        let n = self.stages.len();
        let mut in_degree = vec![0usize; n];
        let mut successors: Vec<SmallVec<[u32; 4]>> = vec![SmallVec::new(); n];

        for edge in &self.edges {
            let from = self.require_stage(&edge.from.stage)?;
            let to = self.require_stage(&edge.to.stage)?;
            successors[from.index()].push(to.0);
            in_degree[to.index()] += 1;
        }

        let mut ready: std::collections::BTreeSet<u32> = (0..n as u32)
            .filter(|&i| in_degree[i as usize] == 0)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(current) = ready.pop_first() {
            order.push(StageId(current));
            for &next in &successors[current as usize] {
                in_degree[next as usize] -= 1;
                if in_degree[next as usize] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != n {
            let stages = in_degree
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0)
                .map(|(i, _)| self.stages[i].name.clone())
                .collect();
            return Err(EvalError::CycleDetected { stages });
        }
        Ok(order)
    }

    fn require_stage(&self, name: &str) -> Result<StageId> {
        self.stage_id(name)
            .ok_or_else(|| EvalError::UnknownStage(name.to_owned()))
    }

    /// Whether `target` is reachable from `start` along existing edges.
    fn reaches(&self, start: StageId, target: StageId) -> bool {
        let mut visited = vec![false; self.stages.len()];
        let mut stack: SmallVec<[StageId; 8]> = SmallVec::new();
        stack.push(start);

        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if std::mem::replace(&mut visited[current.index()], true) {
                continue;
            }
            let name = &self.stages[current.index()].name;
            stack.extend(
                self.edges
                    .iter()
                    .filter(|e| &e.from.stage == name)
                    .filter_map(|e| self.stage_id(&e.to.stage)),
            );
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: StageKind) -> StageConfig {
        kind.default_config()
    }

    #[test]
    fn channel_ref_parsing() {
        let r: ChannelRef = "VBufferRT.viewW".parse().unwrap();
        assert_eq!(r, ChannelRef::new("VBufferRT", "viewW"));
        assert_eq!(r.to_string(), "VBufferRT.viewW");

        for bad in ["VBufferRT", ".viewW", "VBufferRT.", ""] {
            assert!(matches!(
                bad.parse::<ChannelRef>(),
                Err(EvalError::InvalidChannelRef(_))
            ));
        }
    }

    #[test]
    fn duplicate_stage_names_are_rejected() {
        let mut d = PipelineDescriptor::new("g");
        d.add_stage("A", config(StageKind::ToneMapper)).unwrap();
        let err = d.add_stage("A", config(StageKind::ToneMapper)).unwrap_err();
        assert!(matches!(err, EvalError::DuplicateStage(ref n) if n == "A"));
    }

    #[test]
    fn edges_must_reference_declared_channels() {
        let mut d = PipelineDescriptor::new("g");
        d.add_stage("Acc", config(StageKind::AccumulatePass)).unwrap();
        d.add_stage("Tone", config(StageKind::ToneMapper)).unwrap();

        let err = d.add_edge("Acc.color", "Tone.src").unwrap_err();
        assert!(matches!(err, EvalError::UnknownChannel { direction: "output", .. }));

        let err = d.add_edge("Acc.output", "Tone.input").unwrap_err();
        assert!(matches!(err, EvalError::UnknownChannel { direction: "input", .. }));

        let err = d.add_edge("Acc.output", "Missing.src").unwrap_err();
        assert!(matches!(err, EvalError::UnknownStage(ref n) if n == "Missing"));

        d.add_edge("Acc.output", "Tone.src").unwrap();
        assert_eq!(d.edges().len(), 1);
    }

    #[test]
    fn input_fan_in_is_rejected() {
        let mut d = PipelineDescriptor::new("g");
        d.add_stage("A", config(StageKind::AccumulatePass)).unwrap();
        d.add_stage("B", config(StageKind::AccumulatePass)).unwrap();
        d.add_stage("T", config(StageKind::ToneMapper)).unwrap();
        d.add_edge("A.output", "T.src").unwrap();
        let err = d.add_edge("B.output", "T.src").unwrap_err();
        assert!(matches!(err, EvalError::InputAlreadyConnected(ref c) if c == "T.src"));
    }

    #[test]
    fn self_edges_and_cycles_are_rejected() {
        let mut d = PipelineDescriptor::new("g");
        d.add_stage("A", config(StageKind::AccumulatePass)).unwrap();
        d.add_stage("B", config(StageKind::AccumulatePass)).unwrap();

        let err = d.add_edge("A.output", "A.input").unwrap_err();
        assert!(matches!(err, EvalError::SelfEdge(_)));

        d.add_edge("A.output", "B.input").unwrap();
        let err = d.add_edge("B.output", "A.input").unwrap_err();
        assert!(matches!(err, EvalError::CycleDetected { .. }));
        assert_eq!(d.edges().len(), 1, "rejected edge must not be recorded");
    }

    #[test]
    fn validate_requires_terminal_output() {
        let mut d = PipelineDescriptor::new("g");
        d.add_stage("T", config(StageKind::ToneMapper)).unwrap();
        assert!(matches!(d.validate(), Err(EvalError::MissingTerminalOutput(_))));

        assert!(matches!(d.mark_output("T.src"), Err(EvalError::UnknownChannel { .. })));
        d.mark_output("T.dst").unwrap();
        d.validate().unwrap();
        assert_eq!(d.terminal_output(), Some(&ChannelRef::new("T", "dst")));
    }

    #[test]
    fn execution_order_is_topological_and_stable() {
        let mut d = PipelineDescriptor::new("g");
        let tone = d.add_stage("Tone", config(StageKind::ToneMapper)).unwrap();
        let acc = d.add_stage("Acc", config(StageKind::AccumulatePass)).unwrap();
        let pt = d.add_stage("PT", config(StageKind::ComputePathTracer)).unwrap();
        let vb = d.add_stage("VB", config(StageKind::VBufferRT)).unwrap();
        d.add_edge("Acc.output", "Tone.src").unwrap();
        d.add_edge("PT.color", "Acc.input").unwrap();
        d.add_edge("VB.vbuffer", "PT.vbuffer").unwrap();

        let order = d.execution_order().unwrap();
        assert_eq!(order, vec![vb, pt, acc, tone]);
        assert_eq!(order, d.execution_order().unwrap());
    }

    #[test]
    fn accumulating_stages_and_inputs() {
        let mut d = PipelineDescriptor::new("g");
        d.add_stage("PT", config(StageKind::ComputePathTracer)).unwrap();
        let acc = d.add_stage("Acc", config(StageKind::AccumulatePass)).unwrap();
        d.add_edge("PT.color", "Acc.input").unwrap();

        assert_eq!(d.accumulating_stages().collect::<Vec<_>>(), vec![acc]);
        let inputs: Vec<String> = d.inputs_of(acc).map(ToString::to_string).collect();
        assert_eq!(inputs, vec!["PT.color -> Acc.input".to_owned()]);
    }
}
