//! Operator command lines read by the orchestrator binary.

use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Init {
        nodes: usize,
        cache_size: usize,
        policy: String,
    },
    Start,
    Stop,
    Add {
        cache_size: usize,
        policy: String,
    },
    Remove,
    Shutdown,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  init <nodes> <cacheSize> <FIFO|LRU|LFU>   launch and initialize a ring
  start                                     start serving clients
  stop                                      stop serving clients
  add <cacheSize> <FIFO|LRU|LFU>            add one node
  remove                                    remove a random node
  shutdown                                  shut every node down
  help                                      print this message
  quit                                      exit";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unrecognized command {0:?}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("cache strategy has to be FIFO, LRU or LFU, got {0:?}")]
    Policy(String),
}

fn policy(s: &str) -> Result<String, ParseCommandError> {
    let upper = s.to_ascii_uppercase();
    match upper.as_str() {
        "FIFO" | "LRU" | "LFU" => Ok(upper),
        _ => Err(ParseCommandError::Policy(s.to_string())),
    }
}

fn number(s: &str, usage: &'static str) -> Result<usize, ParseCommandError> {
    s.parse().map_err(|_| ParseCommandError::Usage(usage))
}

impl FromStr for OperatorCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, args)) = words.split_first() else {
            return Err(ParseCommandError::Empty);
        };
        match (verb.to_ascii_lowercase().as_str(), args) {
            ("init" | "initservice", [n, size, p]) => {
                const USAGE: &str = "init <nodes> <cacheSize> <policy>";
                Ok(Self::Init {
                    nodes: number(n, USAGE)?,
                    cache_size: number(size, USAGE)?,
                    policy: policy(p)?,
                })
            }
            ("init" | "initservice", _) => {
                Err(ParseCommandError::Usage("init <nodes> <cacheSize> <policy>"))
            }
            ("add" | "addnode", [size, p]) => Ok(Self::Add {
                cache_size: number(size, "add <cacheSize> <policy>")?,
                policy: policy(p)?,
            }),
            ("add" | "addnode", _) => Err(ParseCommandError::Usage("add <cacheSize> <policy>")),
            ("start", []) => Ok(Self::Start),
            ("stop", []) => Ok(Self::Stop),
            ("remove" | "removenode", []) => Ok(Self::Remove),
            ("shutdown", []) => Ok(Self::Shutdown),
            ("help", _) => Ok(Self::Help),
            ("quit" | "exit", []) => Ok(Self::Quit),
            _ => Err(ParseCommandError::Unknown(line.trim().to_string())),
        }
    }
}
