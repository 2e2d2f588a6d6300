use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use super::Command;
use crate::resources::ResourceRequest;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}' (expected create, destroy, status, list, exec or connect)")]
    UnknownCommand(String),

    #[error("'{0}' needs an environment name")]
    MissingTarget(&'static str),

    #[error("nothing to execute: put the code in the message body")]
    MissingCode,

    #[error("could not understand '{0}'")]
    InvalidArgument(String),
}

const FILLER_WORDS: &[&str] = &["a", "an", "and", "with", "new", "vm", "env", "environment", ","];

struct CreateGrammar {
    vcpus: Regex,
    memory: Regex,
    disk: Regex,
    duration: Regex,
    repo: Regex,
}

fn create_grammar() -> &'static CreateGrammar {
    static GRAMMAR: OnceLock<CreateGrammar> = OnceLock::new();
    GRAMMAR.get_or_init(|| CreateGrammar {
        vcpus: Regex::new(r"(?i)\b(\d+)\s*(?:x\s*)?(?:vcpus?|cpus?|cores?)\b").expect("vcpus pattern"),
        memory: Regex::new(r"(?i)\b(\d+)\s*(gb|g|mb|m)\s*(?:of\s+)?(?:ram|memory|mem)\b")
            .expect("memory pattern"),
        disk: Regex::new(r"(?i)\b(\d+)\s*(tb|gb|g)\s*(?:of\s+)?(?:disk|storage)\b")
            .expect("disk pattern"),
        duration: Regex::new(r"(?i)\bfor\s+(\d+)\s*(h|hrs?|hours?|d|days?)\b")
            .expect("duration pattern"),
        repo: Regex::new(r"(?i)\brepo(?:sitory)?\s+(\S+)").expect("repo pattern"),
    })
}

/// Parse a subject line (and optional body) into a [`Command`].
///
/// Unrecognised verbs are an error; nothing falls back to `create`.
pub fn parse_command(subject: &str, body: &str) -> Result<Command, ParseError> {
    let subject = strip_reply_prefixes(subject.trim());
    let body = body.trim();

    let (verb, rest) = match subject.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (subject, ""),
    };

    if verb.is_empty() {
        return Err(ParseError::Empty);
    }

    match verb.to_ascii_lowercase().as_str() {
        "create" | "new" | "spawn" => parse_create(rest, body),
        "destroy" | "delete" | "rm" => Ok(Command::Destroy {
            slug: target(rest, "destroy")?,
        }),
        "status" | "info" => Ok(Command::Status {
            slug: target(rest, "status")?,
        }),
        "list" | "ls" => {
            if rest.is_empty() {
                Ok(Command::List)
            } else {
                Err(ParseError::InvalidArgument(rest.to_string()))
            }
        }
        "exec" | "execute" | "run" => {
            let slug = target_word(rest, "exec")?;
            let inline = rest[slug.len()..].trim();
            let code = if inline.is_empty() { body } else { inline };

            if code.is_empty() {
                return Err(ParseError::MissingCode);
            }

            Ok(Command::Execute {
                slug,
                code: code.to_string(),
            })
        }
        "connect" | "ssh" => Ok(Command::Connect {
            slug: target(rest, "connect")?,
        }),
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

fn strip_reply_prefixes(mut subject: &str) -> &str {
    'outer: loop {
        for prefix in ["re:", "fwd:", "fw:"] {
            let matches = subject
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix));

            if matches {
                subject = subject[prefix.len()..].trim_start();
                continue 'outer;
            }
        }
        return subject;
    }
}

fn target(rest: &str, verb: &'static str) -> Result<String, ParseError> {
    let slug = target_word(rest, verb)?;

    if rest.trim() != slug {
        return Err(ParseError::InvalidArgument(rest[slug.len()..].trim().to_string()));
    }

    Ok(slug)
}

fn target_word(rest: &str, verb: &'static str) -> Result<String, ParseError> {
    let word = rest
        .split_whitespace()
        .next()
        .ok_or(ParseError::MissingTarget(verb))?;

    if !word
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ParseError::InvalidArgument(word.to_string()));
    }

    Ok(word.to_string())
}

fn parse_create(rest: &str, body: &str) -> Result<Command, ParseError> {
    let grammar = create_grammar();
    let mut remaining = rest.to_string();
    let mut resources = ResourceRequest::default();
    let mut duration_hours = None;
    let mut repository_url = None;

    if let Some(caps) = grammar.repo.captures(&remaining) {
        repository_url = Some(caps[1].to_string());
        remaining = grammar.repo.replace(&remaining, " ").into_owned();
    }

    if let Some(caps) = grammar.vcpus.captures(&remaining) {
        resources.vcpus = Some(number(&caps[1])?);
        remaining = grammar.vcpus.replace(&remaining, " ").into_owned();
    }

    if let Some(caps) = grammar.memory.captures(&remaining) {
        let amount = number(&caps[1])?;
        resources.memory_mb = Some(match caps[2].to_ascii_lowercase().as_str() {
            "gb" | "g" => scaled(amount, 1024, &caps[0])?,
            _ => amount,
        });
        remaining = grammar.memory.replace(&remaining, " ").into_owned();
    }

    if let Some(caps) = grammar.disk.captures(&remaining) {
        let amount = number(&caps[1])?;
        resources.disk_gb = Some(match caps[2].to_ascii_lowercase().as_str() {
            "tb" => scaled(amount, 1024, &caps[0])?,
            _ => amount,
        });
        remaining = grammar.disk.replace(&remaining, " ").into_owned();
    }

    if let Some(caps) = grammar.duration.captures(&remaining) {
        let amount = number(&caps[1])?;
        duration_hours = Some(if caps[2].to_ascii_lowercase().starts_with('d') {
            scaled(amount, 24, &caps[0])?
        } else {
            amount
        });
        remaining = grammar.duration.replace(&remaining, " ").into_owned();
    }

    let leftover: Vec<&str> = remaining
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|word| !word.is_empty())
        .filter(|word| !FILLER_WORDS.contains(&word.to_ascii_lowercase().as_str()))
        .collect();

    if !leftover.is_empty() {
        return Err(ParseError::InvalidArgument(leftover.join(" ")));
    }

    Ok(Command::Create {
        resources,
        duration_hours,
        repository_url,
        init_script: (!body.is_empty()).then(|| body.to_string()),
    })
}

fn number(digits: &str) -> Result<i64, ParseError> {
    digits
        .parse()
        .map_err(|_| ParseError::InvalidArgument(digits.to_string()))
}

fn scaled(amount: i64, factor: i64, hint: &str) -> Result<i64, ParseError> {
    amount
        .checked_mul(factor)
        .ok_or_else(|| ParseError::InvalidArgument(hint.trim().to_string()))
}
