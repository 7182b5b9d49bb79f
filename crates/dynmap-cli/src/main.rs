//! Command-line interface for the dynamic mapper.
//!
//! Lets rule authors try a mapping against a payload, validate a rule set,
//! capture sample payloads and inspect topic handling without a running
//! broker.

mod platform;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dynmap_core::config::{defaults, env_vars};
use dynmap_core::topic::{derive_sample_topic, normalize_topic, split_topic_excluding_separator};
use dynmap_core::{validate_rule, EngineConfig, MappingRule, SnoopSession};
use dynmap_engine::{Facades, MappingEngine};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::platform::ConsolePlatform;

/// Dynamic mapper - test and validate payload mapping rules.
#[derive(Parser, Debug)]
#[command(name = "dynmap")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Apply a rule to a payload and print the resulting requests.
    Test {
        /// Rule file (a single rule object).
        #[arg(short, long)]
        rule: PathBuf,
        /// Payload file. Defaults to the rule's source template.
        #[arg(short, long)]
        payload: Option<PathBuf>,
        /// Topic the payload arrived on. Defaults to the rule's sample topic.
        #[arg(short, long)]
        topic: Option<String>,
        /// Deliver the requests to the console platform instead of a dry run.
        #[arg(long)]
        send: bool,
    },
    /// Validate a rule file (one rule or an array of rules).
    Validate {
        /// Rule file.
        #[arg(short, long)]
        rules: PathBuf,
    },
    /// Capture payloads into a rule's snooped templates.
    Snoop {
        /// Rule file (a single rule object).
        #[arg(short, long)]
        rule: PathBuf,
        /// File with one JSON payload per line.
        #[arg(short, long)]
        payloads: PathBuf,
        /// Number of payloads kept. Defaults to `DYNMAP_SNOOP_CAPACITY`.
        #[arg(long)]
        capacity: Option<usize>,
    },
    /// Topic helpers.
    Topic {
        #[command(subcommand)]
        topic_cmd: TopicCommand,
    },
}

/// Topic subcommands.
#[derive(Subcommand, Debug)]
enum TopicCommand {
    /// Print the canonical form of a topic.
    Normalize { topic: String },
    /// Print a sample topic matching a wildcard topic.
    Sample { topic: String },
    /// Print the levels of a topic.
    Split { topic: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Build the env filter for log level control
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.verbose {
            tracing_subscriber::EnvFilter::new("dynmap=debug,dynmap_core=debug,dynmap_engine=debug")
        } else {
            tracing_subscriber::EnvFilter::new(defaults::LOG_FILTER)
                .add_directive(tracing::Level::WARN.into())
        }
    });

    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }

    match args.command {
        Command::Test {
            rule,
            payload,
            topic,
            send,
        } => run_test(&rule, payload.as_deref(), topic, send).await,
        Command::Validate { rules } => run_validate(&rules),
        Command::Snoop {
            rule,
            payloads,
            capacity,
        } => {
            let capacity = capacity.unwrap_or(EngineConfig::from_env().snoop_capacity);
            run_snoop(&rule, &payloads, capacity)
        }
        Command::Topic { topic_cmd } => {
            run_topic(topic_cmd);
            Ok(())
        }
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn load_rule(path: &Path) -> Result<MappingRule> {
    serde_json::from_value(read_json(path)?)
        .with_context(|| format!("{} is not a mapping rule", path.display()))
}

fn load_rules(path: &Path) -> Result<Vec<MappingRule>> {
    let value = read_json(path)?;
    let rules = match value {
        Value::Array(_) => serde_json::from_value(value),
        other => serde_json::from_value(other).map(|rule| vec![rule]),
    };
    rules.with_context(|| format!("{} does not hold mapping rules", path.display()))
}

/// Run one rule against one payload.
async fn run_test(
    rule_path: &Path,
    payload_path: Option<&Path>,
    topic: Option<String>,
    send: bool,
) -> Result<()> {
    let rule = load_rule(rule_path)?;
    let payload = match payload_path {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => rule.source_template.clone().into_bytes(),
    };
    let topic = topic.unwrap_or_else(|| rule.template_topic_sample().to_string());
    debug!("Testing mapping '{}' on topic '{}'", rule.name, topic);

    let console = Arc::new(ConsolePlatform::new());
    let engine = MappingEngine::new(
        Facades::new(console.clone())
            .with_all_apis(console.clone())
            .with_publisher(console),
    )
    .with_config(EngineConfig::from_env());

    let ctx = engine.process(&rule, &payload, &topic, send).await;
    let errors: Vec<Value> = ctx
        .errors
        .iter()
        .map(|e| json!({ "code": e.code(), "message": e.to_string() }))
        .collect();
    let report = json!({
        "mapping": rule.name,
        "topic": topic,
        "processingType": ctx.processing_type(),
        "summary": ctx.summary(),
        "requests": ctx.requests,
        "errors": errors,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if ctx.has_errors() {
        warn!("Mapping '{}' finished with {} error(s)", rule.name, ctx.errors.len());
    }
    Ok(())
}

/// Validate every rule against the others in the same file.
fn run_validate(path: &Path) -> Result<()> {
    let rules = load_rules(path)?;
    let mut invalid = 0;

    for (i, rule) in rules.iter().enumerate() {
        let others: Vec<MappingRule> = rules
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, r)| r.clone())
            .collect();
        let errors = validate_rule(rule, &others);
        if errors.is_empty() {
            println!("✓ {}", rule.name);
            continue;
        }
        invalid += 1;
        println!("✗ {}", rule.name);
        for error in &errors {
            println!("    {}: {}", error.code(), error);
        }
    }

    info!("Validated {} rule(s), {} invalid", rules.len(), invalid);
    if invalid > 0 {
        bail!("{} of {} rule(s) are invalid", invalid, rules.len());
    }
    Ok(())
}

/// Feed payload lines through a snoop session and print the updated rule.
fn run_snoop(rule_path: &Path, payloads: &Path, capacity: usize) -> Result<()> {
    let mut rule = load_rule(rule_path)?;
    let raw = std::fs::read_to_string(payloads)
        .with_context(|| format!("Failed to read {}", payloads.display()))?;

    let captured = snoop_lines(&mut rule, &raw, capacity)
        .with_context(|| format!("No JSON payloads in {}", payloads.display()))?;
    info!("Captured {} payload(s) for '{}'", captured, rule.name);
    println!("{}", serde_json::to_string_pretty(&rule)?);
    Ok(())
}

/// Record every JSON line of `raw` and apply the kept samples to `rule`.
/// Returns the number of samples kept.
fn snoop_lines(rule: &mut MappingRule, raw: &str, capacity: usize) -> Result<usize> {
    let mut session = SnoopSession::new(capacity);
    session.enable()?;
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        if serde_json::from_str::<Value>(line).is_err() {
            warn!("Skipping line that is not JSON: {}", line);
            continue;
        }
        session.record(line);
    }
    if session.is_empty() {
        bail!("nothing captured");
    }
    session.stop()?;
    session.apply_to(rule)?;
    Ok(session.len())
}

fn run_topic(cmd: TopicCommand) {
    match cmd {
        TopicCommand::Normalize { topic } => println!("{}", normalize_topic(&topic)),
        TopicCommand::Sample { topic } => println!("{}", derive_sample_topic(&topic)),
        TopicCommand::Split { topic } => {
            for level in split_topic_excluding_separator(&topic) {
                println!("{}", level);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_test_command() {
        let args = Args::parse_from([
            "dynmap",
            "test",
            "--rule",
            "rule.json",
            "--topic",
            "measurement/d1",
            "--send",
        ]);
        match args.command {
            Command::Test {
                rule,
                topic,
                send,
                payload,
            } => {
                assert_eq!(rule, PathBuf::from("rule.json"));
                assert_eq!(topic.as_deref(), Some("measurement/d1"));
                assert!(send);
                assert!(payload.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_snoop_capacity_defaults_to_config() {
        let args = Args::parse_from(["dynmap", "snoop", "-r", "rule.json", "-p", "p.jsonl"]);
        match args.command {
            Command::Snoop { capacity, .. } => assert_eq!(capacity, None),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_snoop_lines_keep_latest_samples() {
        let mut rule = MappingRule::new(
            "snooped",
            dynmap_core::Direction::Inbound,
            dynmap_core::TargetApi::Measurement,
        );
        let raw = "{\"t\": 1}\nnot json\n\n{\"t\": 2}\n{\"t\": 3}\n";

        let kept = snoop_lines(&mut rule, raw, 2).unwrap();
        assert_eq!(kept, 2);
        assert_eq!(rule.snooped_templates, vec!["{\"t\": 2}", "{\"t\": 3}"]);

        assert!(snoop_lines(&mut rule, "oops\n", 2).is_err());
    }
}
