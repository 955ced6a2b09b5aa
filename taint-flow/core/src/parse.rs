use crate::error::TaintflowError;
use crate::location::Location;
use crate::Index;
use once_cell::sync::Lazy;
use regex::Regex;

// e.g. t54_1741 <- t42_1773, t29_4179
//      t78_744 <*- t72_268   (dereferencing)
//      t78_744 <-*- t72_268  (storing)
static RE_TNT_FLOW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?) (<-|<\*-|<-\*-) (.+)$").unwrap());

/// The five `" | "`-separated fields of an operation line.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LineParts<'a> {
    pub loc: &'a str,
    pub cmd: &'a str,
    pub value: &'a str,
    pub taint: &'a str,
    pub tnt_flow: &'a str,
}

impl<'a> LineParts<'a> {
    /// Splits a line into its fields. Lines that do not have exactly five
    /// fields are not operation lines.
    pub fn new(line: &'a str) -> Option<LineParts<'a>> {
        let mut fields = line.split(" | ");
        let parts = LineParts {
            loc: fields.next()?,
            cmd: fields.next()?,
            value: fields.next()?,
            taint: fields.next()?,
            tnt_flow: fields.next()?,
        };
        match fields.next() {
            Some(_) => None,
            None => Some(parts),
        }
    }
}

/// One `;`-separated clause of the taint-flow field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowClause {
    /// `var <- v1, v2`: ordinary data flow.
    Flow { var: String, sources: Vec<String> },
    /// `var <*- v1`: load through the listed addresses.
    Load { var: String, addrs: Vec<String> },
    /// `var <-*- v1`: store through the listed addresses.
    Store { var: String, addrs: Vec<String> },
    /// `v1, v2`: plain use without an arrow.
    Use { vars: Vec<String> },
}

impl FlowClause {
    pub fn parse(clause: &str) -> Option<FlowClause> {
        let clause = clause.trim();
        if clause.is_empty() {
            return None;
        }

        let Some(cap) = RE_TNT_FLOW.captures(clause) else {
            return Some(FlowClause::Use {
                vars: split_vars(clause),
            });
        };

        let var = cap[1].trim().to_string();
        let vars = split_vars(&cap[3]);
        Some(match &cap[2] {
            "<-" => FlowClause::Flow { var, sources: vars },
            "<*-" => FlowClause::Load { var, addrs: vars },
            _ => FlowClause::Store { var, addrs: vars },
        })
    }

    /// Whether the clause dereferences an address (load or store).
    pub fn is_indirect(&self) -> bool {
        matches!(self, FlowClause::Load { .. } | FlowClause::Store { .. })
    }
}

fn split_vars(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}

/// An operation line split into its interesting parts, before any of its
/// variable references have been resolved.
#[derive(Clone, Debug)]
pub struct ParsedLine<'a> {
    pub location: Location,
    pub opcode: &'a str,
    pub clauses: Vec<FlowClause>,
}

impl<'a> ParsedLine<'a> {
    pub fn parse(line: &'a str) -> Option<ParsedLine<'a>> {
        let parts = LineParts::new(line)?;
        Some(ParsedLine {
            location: Location::parse(parts.loc),
            opcode: parts.cmd.trim(),
            clauses: parts.tnt_flow.split(';').filter_map(FlowClause::parse).collect(),
        })
    }

    /// The variable defined by the `<-` clauses of this line.
    ///
    /// All `<-` clauses of a line have to agree on the variable; anything
    /// else means the trace is inconsistent.
    pub fn flow_var(&self, index: Index) -> Result<Option<&str>, TaintflowError> {
        let mut var: Option<&str> = None;
        for clause in self.clauses.iter() {
            if let FlowClause::Flow { var: v, .. } = clause {
                match var {
                    Some(prev) if prev != v.as_str() => {
                        return Err(TaintflowError::ConflictingDefinition {
                            line: index + 1,
                            first: prev.to_string(),
                            second: v.clone(),
                        });
                    }
                    _ => var = Some(v.as_str()),
                }
            }
        }
        Ok(var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_fields_required() {
        assert!(LineParts::new("a | b | c | d | e").is_some());
        assert!(LineParts::new("a | b | c | d").is_none());
        assert!(LineParts::new("a | b | c | d | e | f").is_none());
        assert!(LineParts::new("==1234== Memcheck, a memory error detector").is_none());
    }

    #[test]
    fn parse_clauses() {
        assert_eq!(
            FlowClause::parse("t54_1741 <- t42_1773, t29_4179"),
            Some(FlowClause::Flow {
                var: "t54_1741".into(),
                sources: vec!["t42_1773".into(), "t29_4179".into()],
            })
        );
        assert_eq!(
            FlowClause::parse("t78_744 <*- t72_268"),
            Some(FlowClause::Load {
                var: "t78_744".into(),
                addrs: vec!["t72_268".into()],
            })
        );
        assert_eq!(
            FlowClause::parse("t78_744 <-*- t72_268"),
            Some(FlowClause::Store {
                var: "t78_744".into(),
                addrs: vec!["t72_268".into()],
            })
        );
        assert_eq!(
            FlowClause::parse("t3_1"),
            Some(FlowClause::Use {
                vars: vec!["t3_1".into()],
            })
        );
        assert_eq!(FlowClause::parse("  "), None);
    }

    #[test]
    fn parse_line() {
        let line = "0x40080D: main (a.c:10) | t3 = Add64 t1 t2 | 0x8 | 0x0 | t3 <- t1, t2; t4 <*- t3";
        let parsed = ParsedLine::parse(line).unwrap();
        assert_eq!(parsed.opcode, "t3 = Add64 t1 t2");
        assert_eq!(parsed.clauses.len(), 2);
        assert!(parsed.clauses[1].is_indirect());
        assert_eq!(parsed.flow_var(0).unwrap(), Some("t3"));
    }

    #[test]
    fn conflicting_flow_vars() {
        let line = "0x1: f (a.c:1) | op | - | - | t3 <- t1; t4 <- t2";
        let parsed = ParsedLine::parse(line).unwrap();
        match parsed.flow_var(6) {
            Err(TaintflowError::ConflictingDefinition { line, first, second }) => {
                assert_eq!(line, 7);
                assert_eq!(first, "t3");
                assert_eq!(second, "t4");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
