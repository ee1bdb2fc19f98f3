//! Scenario scripts and their replay.
//!
//! A script names the participants and a list of steps. Every participant
//! gets an [`EditorSession`] over one shared [`MemoryStore`], and a single
//! [`ManualScheduler`] plays the role of wall-clock time.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use quillsync_core::document::Document;
use quillsync_core::store::Snapshot;
use quillsync_core::{
    EditorSession, ManualScheduler, MemoryStore, QuillsyncError, RealtimeStore, Result,
    Scheduler, Subscription, SyncConfig, UserIdentity, typing_indicator,
};

/// A scenario as written in the script file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Virtual start time (defaults to the Unix epoch)
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Participants
    pub users: Vec<ScriptUser>,
    /// Steps, run in order
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
}

/// A participant.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptUser {
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_color() -> String {
    "black".to_string()
}

/// One raw step. Exactly one action must be present.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptStep {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default, rename = "type")]
    pub text: Option<String>,
    #[serde(default)]
    pub advance_ms: Option<u64>,
    #[serde(default)]
    pub rename: Option<String>,
}

/// A validated step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Type { user: String, text: String },
    Advance { ms: u64 },
    Rename { user: String, to: String },
}

impl ScriptStep {
    fn into_action(self, index: usize) -> Result<Action> {
        let step = index + 1;
        match (self.user, self.text, self.advance_ms, self.rename) {
            (Some(user), Some(text), None, None) => Ok(Action::Type { user, text }),
            (None, None, Some(ms), None) => Ok(Action::Advance { ms }),
            (Some(user), None, None, Some(to)) => Ok(Action::Rename { user, to }),
            _ => Err(QuillsyncError::Script(format!(
                "step {} must be one of {{ user, type }}, {{ advance_ms }}, or {{ user, rename }}",
                step
            ))),
        }
    }
}

impl Scenario {
    /// Parse a scenario from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let scenario: Scenario =
            toml::from_str(contents).map_err(|e| QuillsyncError::Script(e.to_string()))?;
        if scenario.users.is_empty() {
            return Err(QuillsyncError::Script("no users defined".to_string()));
        }
        Ok(scenario)
    }

    /// Load a scenario file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

struct Participant {
    session: EditorSession,
    _document: Subscription,
    _presence: Subscription,
}

/// A running replay.
pub struct Simulation {
    store: MemoryStore,
    clock: ManualScheduler,
    config: SyncConfig,
    participants: BTreeMap<String, Participant>,
}

impl Simulation {
    /// Start sessions for every user in `scenario`.
    pub fn new(scenario: &Scenario, config: SyncConfig) -> Result<Self> {
        let clock = match scenario.start {
            Some(start) => ManualScheduler::new(start),
            None => ManualScheduler::at_epoch(),
        };
        let store = MemoryStore::new();
        let mut participants = BTreeMap::new();

        for user in &scenario.users {
            if participants.contains_key(&user.name) {
                return Err(QuillsyncError::Script(format!(
                    "user '{}' defined twice",
                    user.name
                )));
            }
            let session = EditorSession::new(
                Arc::new(store.clone()),
                Arc::new(clock.clone()),
                UserIdentity::new(user.name.clone(), user.color.clone()),
                config.clone(),
            )?;
            let name = user.name.clone();
            let document = session.subscribe_document(move |text| {
                log::debug!("[simulate] {} accepted remote text ({} chars)", name, text.len());
            })?;
            let presence = session.subscribe_presence(|_| {})?;
            participants.insert(
                user.name.clone(),
                Participant {
                    session,
                    _document: document,
                    _presence: presence,
                },
            );
        }

        Ok(Self {
            store,
            clock,
            config,
            participants,
        })
    }

    /// Run one action.
    pub fn apply(&mut self, action: &Action) -> Result<()> {
        match action {
            Action::Type { user, text } => {
                self.participant(user)?.session.on_local_change(text.clone());
            }
            Action::Advance { ms } => {
                self.clock.advance_ms(*ms);
            }
            Action::Rename { user, to } => {
                self.participant(user)?.session.rename(to.clone());
            }
        }
        Ok(())
    }

    fn participant(&self, user: &str) -> Result<&Participant> {
        self.participants
            .get(user)
            .ok_or_else(|| QuillsyncError::Script(format!("unknown user '{}'", user)))
    }

    /// Milliseconds since the virtual start.
    pub fn elapsed_ms(&self, start: DateTime<Utc>) -> i64 {
        (self.clock.now() - start).num_milliseconds()
    }

    /// One line per participant: displayed text and who they see typing.
    pub fn render_state(&self) -> Vec<String> {
        let width = self.participants.keys().map(String::len).max().unwrap_or(0);
        self.participants
            .iter()
            .map(|(name, participant)| {
                let state = participant.session.local_state();
                let marker = if state.is_typing_locally { "*" } else { " " };
                let typing = typing_indicator(&participant.session.active_typists())
                    .map(|line| format!("   ({})", line))
                    .unwrap_or_default();
                format!(
                    "  {:width$} {}| {:?}{}",
                    name,
                    marker,
                    state.displayed_text,
                    typing,
                    width = width
                )
            })
            .collect()
    }

    /// The document currently held by the store.
    pub fn stored_document(&self) -> Result<Option<Document>> {
        let path = &self.config.document_path;
        let value = self.store.read(path)?;
        Ok(Document::from_snapshot(&Snapshot::new(path.clone(), value)))
    }

    /// Raw store contents.
    pub fn dump(&self) -> serde_json::Value {
        self.store.dump()
    }

    #[cfg(test)]
    fn displayed_text(&self, user: &str) -> Option<String> {
        self.participants
            .get(user)
            .map(|p| p.session.local_state().displayed_text)
    }

    #[cfg(test)]
    fn typists_seen_by(&self, user: &str) -> Vec<String> {
        self.participants
            .get(user)
            .map(|p| {
                p.session
                    .active_typists()
                    .into_iter()
                    .map(|t| t.username)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn describe(action: &Action) -> String {
    match action {
        Action::Type { user, text } => format!("{} types {:?}", user, text),
        Action::Advance { ms } => format!("advance {}ms", ms),
        Action::Rename { user, to } => format!("{} is now known as {}", user, to),
    }
}

/// Replay a scenario and print its timeline.
/// Returns true on success, false on error
pub fn handle_simulate(script: &Path, config: SyncConfig, dump: bool) -> bool {
    match run(script, config, dump) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("✗ {}", e);
            false
        }
    }
}

fn run(script: &Path, config: SyncConfig, dump: bool) -> Result<()> {
    let scenario = Scenario::load_from(script)?;
    let start = scenario.start.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let mut simulation = Simulation::new(&scenario, config)?;

    println!("[{:>6}ms] start", 0);
    for line in simulation.render_state() {
        println!("{}", line);
    }

    for (index, step) in scenario.steps.into_iter().enumerate() {
        let action = step.into_action(index)?;
        simulation.apply(&action)?;
        println!(
            "[{:>6}ms] {}",
            simulation.elapsed_ms(start),
            describe(&action)
        );
        for line in simulation.render_state() {
            println!("{}", line);
        }
    }

    println!();
    match simulation.stored_document()? {
        Some(doc) => println!(
            "Stored document: {:?} (edited by {} at {})",
            doc.text,
            doc.edited_by,
            doc.edited_at.to_rfc3339()
        ),
        None => println!("Stored document: <none>"),
    }
    if dump {
        println!("{}", serde_json::to_string_pretty(&simulation.dump())?);
    }
    Ok(())
}
