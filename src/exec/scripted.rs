//! Scripted shell for unit tests: canned results keyed by command substring.

use super::runner::{CommandOutput, CommandSpec, Shell};
use crate::error::Result;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Test double for [`Shell`].
///
/// The first rule whose needle is a substring of the command line decides
/// the result; unmatched commands exit with the default code and no output.
pub struct ScriptedShell {
    rules: RefCell<Vec<(String, CommandOutput)>>,
    tools: RefCell<HashSet<String>>,
    calls: RefCell<Vec<String>>,
    default_code: i32,
}

impl ScriptedShell {
    /// Unmatched commands succeed
    pub fn new() -> Rc<Self> {
        Self::with_default(0)
    }

    /// Unmatched commands exit with `code`
    pub fn with_default(code: i32) -> Rc<Self> {
        Rc::new(Self {
            rules: RefCell::new(Vec::new()),
            tools: RefCell::new(HashSet::new()),
            calls: RefCell::new(Vec::new()),
            default_code: code,
        })
    }

    /// Answer commands containing `needle`
    pub fn on(&self, needle: &str, code: i32, output: &str) -> &Self {
        self.rules
            .borrow_mut()
            .push((needle.to_string(), CommandOutput::new(code, output)));
        self
    }

    /// Mark `name` as installed
    pub fn tool(&self, name: &str) -> &Self {
        self.tools.borrow_mut().insert(name.to_string());
        self
    }

    /// Command lines executed so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Was a command containing `needle` executed
    pub fn called(&self, needle: &str) -> bool {
        self.calls.borrow().iter().any(|c| c.contains(needle))
    }
}

impl Shell for ScriptedShell {
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(spec.line.clone());
        let rules = self.rules.borrow();
        Ok(rules
            .iter()
            .find(|(needle, _)| spec.line.contains(needle.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| CommandOutput::new(self.default_code, "")))
    }

    fn has_tool(&self, name: &str) -> bool {
        self.tools.borrow().contains(name)
    }
}
