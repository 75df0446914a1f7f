use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Destination for relayed text. Adding a backend means adding a variant
/// here and an arm in the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    /// Re-post into the source channel via `chat.postMessage`.
    Echo,
    /// POST to an external incoming-webhook URL.
    Webhook { url: String },
}

const WEBHOOK_TAG: &str = "slack-iwh";

fn default_backend_tag() -> String {
    "echo".to_string()
}

/// Persisted/displayed shape of a rule. Fields are declared in alphabetical
/// order so serialization comes out key-sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    #[serde(default = "default_backend_tag")]
    pub backend: String,
    #[serde(rename = "backend-url", default)]
    pub backend_url: Option<String>,
    #[serde(rename = "frontend-channel", default)]
    pub frontend_channel: String,
    #[serde(rename = "frontend-team", default)]
    pub frontend_team: String,
    #[serde(default)]
    pub name: String,
}

/// A relay rule: messages from (frontend_team, frontend_channel) go to the
/// backend. Identity is the name; rules are immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub frontend_team: String,
    pub frontend_channel: String,
    pub backend: Backend,
}

impl Rule {
    pub fn from_record(record: RuleRecord) -> Self {
        let backend = if record.backend == WEBHOOK_TAG {
            // Pasted URLs sometimes arrive wrapped in <>.
            let url = record
                .backend_url
                .unwrap_or_default()
                .trim_matches(|c| c == '<' || c == '>')
                .to_string();
            Backend::Webhook { url }
        } else {
            Backend::Echo
        };
        Self {
            name: record.name,
            frontend_team: record.frontend_team,
            frontend_channel: record.frontend_channel,
            backend,
        }
    }

    pub fn to_record(&self) -> RuleRecord {
        let (backend, backend_url) = match &self.backend {
            Backend::Echo => (default_backend_tag(), None),
            Backend::Webhook { url } => (WEBHOOK_TAG.to_string(), Some(url.clone())),
        };
        RuleRecord {
            backend,
            backend_url,
            frontend_channel: self.frontend_channel.clone(),
            frontend_team: self.frontend_team.clone(),
            name: self.name.clone(),
        }
    }

    pub fn matches(&self, team_name: &str, channel_name: &str) -> bool {
        if self.frontend_team != team_name {
            debug!("rule {}: frontend team mismatch, skipping", self.name);
            return false;
        }
        if self.frontend_channel != channel_name {
            debug!("rule {}: frontend channel mismatch, skipping", self.name);
            return false;
        }
        true
    }
}

/// In-memory rule set with durable persistence to a JSON file.
pub struct RuleStore {
    rules: Vec<Rule>,
    names: HashSet<String>,
    path: PathBuf,
}

impl RuleStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            rules: Vec::new(),
            names: HashSet::new(),
            path,
        }
    }

    /// Append a rule. Returns false without mutating on an empty name,
    /// empty source fields, a webhook with no URL, or a duplicate name.
    pub fn add_rule(&mut self, rule: Rule) -> bool {
        if rule.name.is_empty() || rule.frontend_team.is_empty() || rule.frontend_channel.is_empty()
        {
            return false;
        }
        if let Backend::Webhook { url } = &rule.backend {
            if url.is_empty() {
                return false;
            }
        }
        if self.names.contains(&rule.name) {
            return false;
        }
        self.names.insert(rule.name.clone());
        self.rules.push(rule);
        true
    }

    /// Remove the rule with that name; returns whether one was removed.
    pub fn remove_rule(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.name != name);
        self.names.remove(name);
        self.rules.len() != before
    }

    pub fn remove_all(&mut self) {
        self.rules.clear();
        self.names.clear();
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn records(&self) -> Vec<RuleRecord> {
        self.rules.iter().map(Rule::to_record).collect()
    }

    /// Load rules from the backing file, creating it empty if absent.
    /// A record the store rejects is a corrupt configuration.
    pub fn load(&mut self) -> Result<()> {
        self.remove_all();
        if !self.path.is_file() {
            self.store().context("failed to create rule file")?;
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let records: Vec<RuleRecord> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        for record in records {
            let rule = Rule::from_record(record);
            let name = rule.name.clone();
            if !self.add_rule(rule) {
                anyhow::bail!("bad rule {name:?} in {}", self.path.display());
            }
        }
        info!(
            "loaded {} relay rule(s) from {}",
            self.rules.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Persist the rule set, replacing the file atomically so a concurrent
    /// reader never observes a partial write.
    pub fn store(&self) -> Result<()> {
        let json =
            serde_json::to_string_pretty(&self.records()).context("failed to serialize rules")?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json.as_bytes())
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
