//! Patch graph
//!
//! Holds the declarative routing specification and answers adjacency
//! queries. The source format is a whitespace-separated token stream:
//! an endpoint is any token containing `:` (a client-local port name),
//! and a connection is written `a:out -> b:in` or `b:in <- a:out`.
//!
//! Parsing runs an explicit finite-state machine:
//! START →(endpoint)→ LHS_ASSIGNED →(arrow)→ {RIGHT_ARROW|LEFT_ARROW}
//! →(endpoint)→ emit rule → START. `<-` swaps which side is the source.
//! Anything else is a parse error: there is no useful default routing,
//! so a failed initial load is fatal to startup.

use std::fs;
use std::path::{Path, PathBuf};

use crate::Error;

/// One ordered (source, destination) pair. Duplicates are legal; each
/// occurrence produces its own connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub src: String,
    pub dst: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    LhsAssigned,
    RightArrow,
    LeftArrow,
}

pub struct Patch {
    path: PathBuf,
    rules: Vec<Rule>,
}

impl Patch {
    /// Read and parse the patch file.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let rules = read_rules(&path)?;
        log::info!("loaded {} patch rule(s) from {}", rules.len(), path.display());
        Ok(Self { path, rules })
    }

    /// Re-parse the same source and atomically replace the rule set.
    /// On failure the previous rules stay in place.
    pub fn reload(&mut self) -> Result<(), Error> {
        let rules = read_rules(&self.path)?;
        log::info!(
            "reloaded {} patch rule(s) from {}",
            rules.len(),
            self.path.display()
        );
        self.rules = rules;
        Ok(())
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// All sources wired into `dst`, in rule-insertion order.
    pub fn sources_for<'a>(&'a self, dst: &'a str) -> impl Iterator<Item = &'a str> {
        self.rules
            .iter()
            .filter(move |r| r.dst == dst)
            .map(|r| r.src.as_str())
    }

    /// All destinations wired from `src`, in rule-insertion order.
    pub fn destinations_for<'a>(&'a self, src: &'a str) -> impl Iterator<Item = &'a str> {
        self.rules
            .iter()
            .filter(move |r| r.src == src)
            .map(|r| r.dst.as_str())
    }
}

fn read_rules(path: &Path) -> Result<Vec<Rule>, Error> {
    let source = fs::read_to_string(path).map_err(|source| Error::PatchRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&source)
}

/// Run the token FSM over `source`.
fn parse(source: &str) -> Result<Vec<Rule>, Error> {
    let mut rules = Vec::new();
    let mut state = State::Start;
    let mut lhs = String::new();

    for token in source.split_whitespace() {
        if token.contains(crate::names::PORT_SEP) {
            match state {
                State::Start => {
                    lhs = token.to_string();
                    state = State::LhsAssigned;
                }
                State::RightArrow => {
                    rules.push(Rule {
                        src: std::mem::take(&mut lhs),
                        dst: token.to_string(),
                    });
                    state = State::Start;
                }
                State::LeftArrow => {
                    rules.push(Rule {
                        src: token.to_string(),
                        dst: std::mem::take(&mut lhs),
                    });
                    state = State::Start;
                }
                State::LhsAssigned => {
                    return Err(Error::PatchToken {
                        token: token.to_string(),
                    });
                }
            }
        } else if token == "->" || token == "<-" {
            if state != State::LhsAssigned {
                return Err(Error::PatchToken {
                    token: token.to_string(),
                });
            }
            state = if token == "->" {
                State::RightArrow
            } else {
                State::LeftArrow
            };
        } else {
            return Err(Error::PatchToken {
                token: token.to_string(),
            });
        }
    }

    if state != State::Start {
        return Err(Error::PatchTruncated);
    }
    Ok(rules)
}
