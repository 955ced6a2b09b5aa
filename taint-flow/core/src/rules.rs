//! Opcode classification tables used by the taint lattice.
//!
//! Which opcodes synthesize dangerous integers and which ones use a value in
//! a dangerous way is a heuristic. The defaults here match what the
//! instrumentation emits for VEX IR, but every table can be replaced from a
//! JSON file.

use crate::error::TaintflowError;
use hashbrown::HashSet;
use regex::Regex;
use serde::Deserialize;
use std::io::Read;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct OpcodeRules {
    /// Mnemonics (without size suffix) that combine operands arithmetically.
    pub widening: Vec<String>,
    /// Mnemonic of a subtraction, for the pointer-minus-self pattern.
    pub subtract: String,
    /// Pattern matched against the full mnemonic of comparisons.
    pub compare: String,
    /// Mnemonic prefixes of ternary selects; the first operand is tested.
    pub select: Vec<String>,
    /// Pattern matched against the whole opcode text of conditional
    /// branches; the first capture group is the tested variable.
    pub branch: String,
    /// Pattern matched against the whole opcode text of calls; the first
    /// capture group is the callee.
    pub call: String,
    /// Callees whose arguments end up as the process exit status.
    pub exit_functions: Vec<String>,
}

impl Default for OpcodeRules {
    fn default() -> Self {
        let widening = [
            "Add", "Sub", "Mul", "MullS", "MullU", "Div", "DivS", "DivU", "DivModS", "DivModU",
            "Mod", "And", "Or", "Xor", "Shl", "Shr", "Sar",
        ];
        Self {
            widening: widening.iter().map(|s| s.to_string()).collect(),
            subtract: String::from("Sub"),
            compare: String::from(r"^(?:Cas|Exp)?Cmp"),
            select: vec![String::from("ITE"), String::from("Mux0X")],
            branch: String::from(r"^IF\s+(\S+)"),
            call: String::from(r"^(?:CALL|Call|call)\s+\*?([A-Za-z_.$][\w.$]*)"),
            exit_functions: ["exit", "_exit", "_Exit", "exit_group", "quick_exit"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl OpcodeRules {
    /// Reads rule overrides from JSON. Missing keys keep their defaults.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TaintflowError> {
        serde_json::from_reader(reader).map_err(TaintflowError::Rules)
    }

    pub fn compile(&self) -> Result<CompiledRules, TaintflowError> {
        Ok(CompiledRules {
            widening: self.widening.iter().cloned().collect(),
            subtract: self.subtract.clone(),
            compare: Regex::new(&self.compare)?,
            select: self.select.clone(),
            branch: Regex::new(&self.branch)?,
            call: Regex::new(&self.call)?,
            exit_functions: self.exit_functions.iter().cloned().collect(),
        })
    }
}

/// `OpcodeRules` with its patterns compiled, ready for classification.
#[derive(Clone, Debug)]
pub struct CompiledRules {
    widening: HashSet<String>,
    subtract: String,
    compare: Regex,
    select: Vec<String>,
    branch: Regex,
    call: Regex,
    exit_functions: HashSet<String>,
}

impl CompiledRules {
    pub fn is_widening(&self, op: &Opcode) -> bool {
        self.widening.contains(op.base())
    }

    pub fn is_subtract(&self, op: &Opcode) -> bool {
        op.base() == self.subtract
    }

    pub fn is_compare(&self, op: &Opcode) -> bool {
        self.compare.is_match(op.mnemonic)
    }

    /// The tested operand of a ternary select.
    pub fn select_condition<'a>(&self, op: &Opcode<'a>) -> Option<&'a str> {
        if self.select.iter().any(|s| op.mnemonic.starts_with(s.as_str())) {
            return op.operands.first().copied();
        }
        None
    }

    /// The tested variable of a conditional branch.
    pub fn branch_condition<'a>(&self, op: &Opcode<'a>) -> Option<&'a str> {
        self.branch
            .captures(op.text)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str())
    }

    pub fn is_exit_call(&self, op: &Opcode) -> bool {
        let Some(callee) = self.call.captures(op.text).and_then(|cap| cap.get(1)) else {
            return false;
        };
        let callee = callee.as_str();
        let callee = callee.strip_suffix("@plt").unwrap_or(callee);
        self.exit_functions.contains(callee)
    }

    /// Branches and calls only consume their operands.
    pub fn is_use_only(&self, op: &Opcode) -> bool {
        op.target.is_none() && (self.branch.is_match(op.text) || self.call.is_match(op.text))
    }
}

/// The opcode field of a trace line, split into mnemonic and operands.
///
/// For assignments (`t3 = Add32 t1 t2`) only the right hand side counts.
#[derive(Copy, Clone, Debug)]
pub struct Opcode<'a> {
    pub text: &'a str,
    pub mnemonic: &'a str,
    target: Option<&'a str>,
    operands: [&'a str; 4],
    len: usize,
}

impl<'a> Opcode<'a> {
    pub fn new(text: &'a str) -> Self {
        let text = text.trim();
        let (target, rhs) = match text.split_once(" = ") {
            Some((lhs, rhs)) => (Some(lhs.trim()), rhs),
            None => (None, text),
        };
        let mut tokens = rhs.split_whitespace();
        let mnemonic = tokens.next().unwrap_or("");
        let mut operands = [""; 4];
        let mut len = 0;
        for token in tokens.take(4) {
            operands[len] = token;
            len += 1;
        }
        Self {
            text,
            mnemonic,
            target,
            operands,
            len,
        }
    }

    /// The mnemonic without its size and signedness suffix
    /// (`Add32` -> `Add`, `DivModU64to32` -> `DivModU`).
    pub fn base(&self) -> &'a str {
        let end = self
            .mnemonic
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(self.mnemonic.len());
        &self.mnemonic[..end]
    }

    /// The assigned variable, `t3` in `t3 = Add32 t1 t2`.
    pub fn target(&self) -> Option<&'a str> {
        self.target
    }

    pub fn operands(&self) -> &[&'a str] {
        &self.operands[..self.len]
    }
}
