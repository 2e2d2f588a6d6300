//! Structured user commands and their dispatch.
//!
//! Commands arrive either already structured (API callers) or as a mail-style
//! subject/body pair that `parse_command` turns into a [`Command`].

mod parser;
mod processor;

pub use parser::{parse_command, ParseError};
pub use processor::{CommandError, CommandOutcome, CommandProcessor, ConnectionDetails, UserContext};

use serde::{Deserialize, Serialize};

use crate::resources::ResourceRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    Create {
        #[serde(default)]
        resources: ResourceRequest,
        duration_hours: Option<i64>,
        repository_url: Option<String>,
        init_script: Option<String>,
    },
    Destroy {
        slug: String,
    },
    Status {
        slug: String,
    },
    List,
    Execute {
        slug: String,
        code: String,
    },
    Connect {
        slug: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::Destroy { .. } => "destroy",
            Command::Status { .. } => "status",
            Command::List => "list",
            Command::Execute { .. } => "execute",
            Command::Connect { .. } => "connect",
        }
    }

    /// Slug the command targets, if it targets one.
    pub fn target(&self) -> Option<&str> {
        match self {
            Command::Destroy { slug }
            | Command::Status { slug }
            | Command::Execute { slug, .. }
            | Command::Connect { slug } => Some(slug),
            Command::Create { .. } | Command::List => None,
        }
    }
}
