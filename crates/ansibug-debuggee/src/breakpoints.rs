//! Breakpoint bookkeeping for playbook sources.
//!
//! The runtime reports which lines of a file start a task (or cannot hold a
//! breakpoint at all) as it loads the file. Every other line belongs to the
//! nearest classified line above it. Breakpoints requested by the client are
//! resolved against that table, and re-resolved whenever it changes.

use std::collections::{BTreeMap, HashMap};

use ansibug_dap::types::{Breakpoint, Source, SourceBreakpoint};
use parking_lot::Mutex;

pub const MODIFIED_SOURCE_MESSAGE: &str = "Cannot set breakpoint on a modified source";
pub const NOT_LOADED_MESSAGE: &str =
    "File has not been loaded by Ansible, cannot detect breakpoints yet";
pub const INVALID_LINE_MESSAGE: &str = "Breakpoint cannot be set here";

/// Classification reported by the runtime for a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Nothing can stop at or below this line until the next classified line.
    Invalid,
    /// A task or block starts here.
    ValidStart,
}

/// Sparse classification table for a single runtime path.
///
/// Only explicitly classified lines are stored. Unlisted lines below `len`
/// are continuations of the nearest stored line at or below them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTable {
    entries: BTreeMap<i64, LineKind>,
    len: i64,
}

impl Default for LineTable {
    fn default() -> Self {
        Self {
            entries: BTreeMap::from([(0, LineKind::Invalid)]),
            len: 1,
        }
    }
}

impl LineTable {
    pub(crate) fn len(&self) -> i64 {
        self.len
    }

    /// Extend the table to cover `line` and classify it. Line 0 stays invalid.
    pub fn register(&mut self, line: i64, kind: LineKind) {
        if line < 0 {
            return;
        }
        if line >= self.len {
            // `i64::MAX` cannot be followed by another line; the last range
            // then ends at it.
            self.len = line.saturating_add(1);
        }
        if line > 0 {
            self.entries.insert(line, kind);
        }
    }

    /// Resolve a requested line to the classified range containing it.
    ///
    /// Lines past the end of the table resolve to the last range.
    pub fn resolve(&self, line: i64) -> Resolution {
        let clamped = line.clamp(0, self.len - 1);
        let (start, kind) = self
            .entries
            .range(..=clamped)
            .next_back()
            .map_or((0, LineKind::Invalid), |(&start, &kind)| (start, kind));
        let end = self
            .entries
            .range(start + 1..)
            .next()
            .map_or(self.len, |(&next, _)| next);

        Resolution {
            verified: kind == LineKind::ValidStart,
            start,
            end,
        }
    }
}

/// A resolved breakpoint range. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub verified: bool,
    pub start: i64,
    pub end: i64,
}

impl Resolution {
    pub fn contains(&self, line: i64) -> bool {
        (self.start..self.end).contains(&line)
    }
}

/// A breakpoint kept by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBreakpoint {
    pub id: i64,
    pub source: Source,
    /// The breakpoint as the client sent it.
    pub source_breakpoint: SourceBreakpoint,
    pub client_path: String,
    pub runtime_path: String,
    /// `None` until the runtime has loaded `runtime_path`.
    pub resolution: Option<Resolution>,
}

impl LineBreakpoint {
    pub fn requested_line(&self) -> i64 {
        self.source_breakpoint.line
    }

    pub fn to_dap(&self) -> Breakpoint {
        let mut breakpoint = Breakpoint {
            id: Some(self.id),
            source: Some(self.source.clone()),
            ..Breakpoint::default()
        };
        match self.resolution {
            Some(resolution) => {
                breakpoint.verified = resolution.verified;
                breakpoint.line = Some(resolution.start);
                // DAP end lines are inclusive.
                breakpoint.end_line = Some(resolution.end - 1);
                if !resolution.verified {
                    breakpoint.message = Some(INVALID_LINE_MESSAGE.to_string());
                }
            }
            None => {
                breakpoint.line = Some(self.requested_line());
                breakpoint.column = self.source_breakpoint.column;
                breakpoint.message = Some(NOT_LOADED_MESSAGE.to_string());
            }
        }
        breakpoint
    }
}

#[derive(Debug)]
struct RegistryState {
    tables: HashMap<String, LineTable>,
    breakpoints: BTreeMap<i64, LineBreakpoint>,
    next_id: i64,
}

#[derive(Debug)]
pub struct BreakpointRegistry {
    state: Mutex<RegistryState>,
}

impl Default for BreakpointRegistry {
    fn default() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                tables: HashMap::new(),
                breakpoints: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the classification of `line` in `path` and re-resolve the
    /// breakpoints on that path.
    ///
    /// Returns the breakpoints whose verification or range changed, in id
    /// order, so the caller can notify the client.
    pub fn register_line(&self, path: &str, line: i64, kind: LineKind) -> Vec<Breakpoint> {
        let mut state = self.state.lock();
        let state = &mut *state;

        let table = state.tables.entry(path.to_owned()).or_default();
        table.register(line, kind);

        state
            .breakpoints
            .values_mut()
            .filter(|bp| bp.runtime_path == path)
            .filter_map(|bp| {
                let resolution = Some(table.resolve(bp.requested_line()));
                if bp.resolution == resolution {
                    return None;
                }
                bp.resolution = resolution;
                Some(bp.to_dap())
            })
            .collect()
    }

    /// Replace every breakpoint set from `client_path` with `requested`.
    ///
    /// The result holds one entry per requested breakpoint, in request order.
    /// Breakpoints on a modified source are reported but not kept.
    pub fn set_breakpoints(
        &self,
        client_path: &str,
        runtime_path: &str,
        source: &Source,
        requested: &[SourceBreakpoint],
        source_modified: bool,
    ) -> Vec<Breakpoint> {
        let mut state = self.state.lock();
        state
            .breakpoints
            .retain(|_, bp| bp.client_path != client_path);

        let mut result = Vec::with_capacity(requested.len());
        for source_breakpoint in requested {
            let id = state.next_id;
            state.next_id += 1;

            if source_modified {
                result.push(Breakpoint {
                    id: Some(id),
                    verified: false,
                    message: Some(MODIFIED_SOURCE_MESSAGE.to_string()),
                    source: Some(source.clone()),
                    ..Breakpoint::default()
                });
                continue;
            }

            let breakpoint = LineBreakpoint {
                id,
                source: source.clone(),
                source_breakpoint: source_breakpoint.clone(),
                client_path: client_path.to_owned(),
                runtime_path: runtime_path.to_owned(),
                resolution: state
                    .tables
                    .get(runtime_path)
                    .map(|table| table.resolve(source_breakpoint.line)),
            };
            result.push(breakpoint.to_dap());
            state.breakpoints.insert(id, breakpoint);
        }

        tracing::debug!(
            target: "ansibug.debuggee",
            client_path,
            runtime_path,
            count = result.len(),
            source_modified,
            "updated breakpoints"
        );
        result
    }

    /// The lowest-id breakpoint on `path` whose resolved range covers `line`.
    pub fn lookup(&self, path: &str, line: i64) -> Option<LineBreakpoint> {
        self.state
            .lock()
            .breakpoints
            .values()
            .find(|bp| {
                bp.runtime_path == path
                    && bp.resolution.is_some_and(|resolution| resolution.contains(line))
            })
            .cloned()
    }
}
