//! If-trigger/then-actions automation over organized files.
//!
//! Every enabled rule whose trigger matches fires, in declaration order.
//! Actions of a rule run in order against one file reference that `move`
//! updates; the updated reference is also what later rules see. A failing
//! action is recorded and the rest still run.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;
use vsort_config::{
    log_workflow_debug, log_workflow_info, log_workflow_warn, ActionSpec, RuleSpec, TriggerKind,
};
use vsort_ledger::{ExecutionRecord, Ledger, LedgerError};

use crate::convert;
use crate::extract::{DefaultExtractor, TextExtractor};
use crate::planner::{dotted_extension, place_without_clobber, FileMover, NoClobberMover};

/// Results kept in the in-memory execution log.
const EXECUTION_LOG_LIMIT: usize = 100;

/// Extensions `convert_to_pdf` accepts.
const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp", ".bmp"];

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Rule not found: {0}")]
    UnknownRule(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Receives `vault_backup` requests. Returns the stored blob id.
pub trait BackupHook {
    fn backup(&self, path: &Path) -> anyhow::Result<String>;
}

impl<F> BackupHook for F
where
    F: Fn(&Path) -> anyhow::Result<String>,
{
    fn backup(&self, path: &Path) -> anyhow::Result<String> {
        self(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Skipped,
    Error,
}

/// What one action did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub action: String,
    pub status: StepStatus,
    /// Destination, output path, blob id, skip reason or error message.
    pub detail: String,
}

impl ActionOutcome {
    fn ok(action: &str, detail: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            status: StepStatus::Ok,
            detail: detail.into(),
        }
    }

    fn skipped(action: &str, reason: &str) -> Self {
        Self {
            action: action.to_string(),
            status: StepStatus::Skipped,
            detail: reason.to_string(),
        }
    }

    fn error(action: &str, error: impl ToString) -> Self {
        Self {
            action: action.to_string(),
            status: StepStatus::Error,
            detail: error.to_string(),
        }
    }
}

/// One rule firing on one file.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub rule_name: String,
    /// File location after the rule's actions ran.
    pub file_path: PathBuf,
    pub actions: Vec<ActionOutcome>,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.actions.iter().all(|a| a.status != StepStatus::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.actions.iter().filter(|a| a.status == StepStatus::Error)
    }

    fn to_record(&self) -> ExecutionRecord {
        ExecutionRecord {
            rule_name: self.rule_name.clone(),
            file_path: self.file_path.display().to_string(),
            actions_executed: self
                .actions
                .iter()
                .filter(|a| a.status == StepStatus::Ok)
                .map(|a| a.action.clone())
                .collect(),
            errors: self
                .errors()
                .map(|a| format!("{}: {}", a.action, a.detail))
                .collect(),
            success: self.success(),
            executed_at: self.executed_at,
        }
    }
}

#[derive(Debug)]
enum Trigger {
    Content(Option<Regex>),
    Extension(Vec<String>),
    Filename(Option<Regex>),
}

impl Trigger {
    fn compile(kind: TriggerKind, value: &str) -> Self {
        match kind {
            TriggerKind::ContentMatch => Trigger::Content(case_insensitive(value)),
            TriggerKind::FilenameMatch => Trigger::Filename(case_insensitive(value)),
            TriggerKind::ExtensionMatch => Trigger::Extension(
                value
                    .split(',')
                    .map(|e| e.trim().to_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect(),
            ),
        }
    }

    fn matches(&self, path: &Path, text: &str) -> bool {
        match self {
            Trigger::Content(re) => re.as_ref().is_some_and(|re| re.is_match(text)),
            Trigger::Filename(re) => match (re, path.file_name()) {
                (Some(re), Some(name)) => re.is_match(&name.to_string_lossy()),
                _ => false,
            },
            Trigger::Extension(exts) => {
                let ext = dotted_extension(path).to_lowercase();
                !ext.is_empty() && exts.iter().any(|e| *e == ext)
            }
        }
    }
}

/// Invalid patterns degrade to a literal match.
fn case_insensitive(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .or_else(|e| {
            log_workflow_warn!("Invalid pattern, matching literally", pattern = pattern, error = %e);
            RegexBuilder::new(&regex::escape(pattern))
                .case_insensitive(true)
                .build()
        })
        .ok()
}

#[derive(Debug)]
struct Rule {
    spec: RuleSpec,
    trigger: Trigger,
}

impl Rule {
    fn new(spec: RuleSpec) -> Self {
        let trigger = Trigger::compile(spec.trigger_type, &spec.trigger_value);
        Self { spec, trigger }
    }
}

/// The built-in rule set used when nothing is configured or persisted.
pub fn default_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec {
            name: "Expenses Trigger".to_string(),
            trigger_type: TriggerKind::ContentMatch,
            trigger_value: r"total\s*due|amount\s*due|invoice\s*total|factura".to_string(),
            actions: vec![
                ActionSpec::Move {
                    destination: "Expenses".to_string(),
                },
                ActionSpec::Tag {
                    value: "expense".to_string(),
                },
                ActionSpec::VaultBackup,
            ],
            enabled: true,
        },
        RuleSpec {
            name: "Receipt Auto-Save".to_string(),
            trigger_type: TriggerKind::ContentMatch,
            trigger_value: r"receipt|recibo|order\s*confirmation|payment\s*received".to_string(),
            actions: vec![
                ActionSpec::Move {
                    destination: "Receipts".to_string(),
                },
                ActionSpec::VaultBackup,
            ],
            enabled: true,
        },
        RuleSpec {
            name: "Auto-Unzip Archives".to_string(),
            trigger_type: TriggerKind::ExtensionMatch,
            trigger_value: ".zip".to_string(),
            actions: vec![ActionSpec::Unzip],
            enabled: true,
        },
        RuleSpec {
            name: "Screenshot to PDF".to_string(),
            trigger_type: TriggerKind::FilenameMatch,
            trigger_value: "screenshot|captura|snip|screen".to_string(),
            actions: vec![ActionSpec::ConvertToPdf],
            enabled: false,
        },
    ]
}

pub struct WorkflowEngine {
    rules: Vec<Rule>,
    organized_root: PathBuf,
    extractor: Box<dyn TextExtractor>,
    mover: Box<dyn FileMover>,
    log: VecDeque<ExecutionResult>,
    ledger: Option<Ledger>,
}

impl WorkflowEngine {
    pub fn new(rules: Vec<RuleSpec>, organized_root: impl Into<PathBuf>) -> Self {
        Self {
            rules: rules.into_iter().map(Rule::new).collect(),
            organized_root: organized_root.into(),
            extractor: Box::new(DefaultExtractor::default()),
            mover: Box::new(NoClobberMover),
            log: VecDeque::with_capacity(EXECUTION_LOG_LIMIT),
            ledger: None,
        }
    }

    /// Rules come from `configured` when given, else from the ledger, else
    /// the built-ins. Executions and rule edits are persisted.
    pub fn load(
        configured: Option<Vec<RuleSpec>>,
        organized_root: impl Into<PathBuf>,
        ledger: Ledger,
    ) -> Result<Self> {
        let rules = match configured {
            Some(rules) => rules,
            None => {
                let stored = ledger.rules()?;
                if stored.is_empty() {
                    default_rules()
                } else {
                    stored
                }
            }
        };
        log_workflow_info!("Workflow rules loaded", count = rules.len());
        let mut engine = Self::new(rules, organized_root);
        engine.ledger = Some(ledger);
        Ok(engine)
    }

    pub fn with_extractor(mut self, extractor: Box<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_mover(mut self, mover: Box<dyn FileMover>) -> Self {
        self.mover = mover;
        self
    }

    // === Rule management ===

    /// Insert a rule, replacing any rule with the same name in place.
    pub fn add_rule(&mut self, spec: RuleSpec) -> Result<()> {
        if let Some(ledger) = &self.ledger {
            ledger.save_rule(&spec)?;
        }
        let rule = Rule::new(spec);
        match self.rules.iter_mut().find(|r| r.spec.name == rule.spec.name) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
        Ok(())
    }

    /// Returns whether a rule was removed.
    pub fn remove_rule(&mut self, name: &str) -> Result<bool> {
        let before = self.rules.len();
        self.rules.retain(|r| r.spec.name != name);
        if let Some(ledger) = &self.ledger {
            ledger.remove_rule(name)?;
        }
        Ok(self.rules.len() != before)
    }

    /// Returns whether the rule exists.
    pub fn toggle_rule(&mut self, name: &str, enabled: bool) -> Result<bool> {
        let Some(rule) = self.rules.iter_mut().find(|r| r.spec.name == name) else {
            return Ok(false);
        };
        rule.spec.enabled = enabled;
        if let Some(ledger) = &self.ledger {
            ledger.save_rule(&rule.spec)?;
        }
        Ok(true)
    }

    pub fn rule(&self, name: &str) -> Result<&RuleSpec> {
        self.rules
            .iter()
            .find(|r| r.spec.name == name)
            .map(|r| &r.spec)
            .ok_or_else(|| WorkflowError::UnknownRule(name.to_string()))
    }

    pub fn rules(&self) -> Vec<RuleSpec> {
        self.rules.iter().map(|r| r.spec.clone()).collect()
    }

    /// The last `limit` results, oldest first.
    pub fn execution_log(&self, limit: usize) -> Vec<ExecutionResult> {
        let skip = self.log.len().saturating_sub(limit);
        self.log.iter().skip(skip).cloned().collect()
    }

    // === Execution ===

    /// Run every enabled, matching rule against `path`.
    #[instrument(skip(self, backup), fields(path = %path.display()), level = "debug")]
    pub fn evaluate(&mut self, path: &Path, backup: Option<&dyn BackupHook>) -> Vec<ExecutionResult> {
        if !path.exists() {
            return Vec::new();
        }

        let needs_text = self
            .rules
            .iter()
            .any(|r| r.spec.enabled && matches!(r.trigger, Trigger::Content(_)));
        let text = if needs_text {
            self.extractor.extract(path).unwrap_or_else(|e| {
                log_workflow_debug!("Text extraction failed", error = %e);
                String::new()
            })
        } else {
            String::new()
        };

        let mut current = path.to_path_buf();
        let mut results = Vec::new();
        for index in 0..self.rules.len() {
            let rule = &self.rules[index];
            if !rule.spec.enabled || !rule.trigger.matches(&current, &text) {
                continue;
            }

            let actions = rule.spec.actions.clone();
            let rule_name = rule.spec.name.clone();
            let mut outcomes = Vec::with_capacity(actions.len());
            for action in &actions {
                outcomes.push(self.run_action(action, &mut current, backup));
            }

            let result = ExecutionResult {
                rule_name,
                file_path: current.clone(),
                actions: outcomes,
                executed_at: Utc::now(),
            };
            log_workflow_info!(
                "Rule fired",
                rule = %result.rule_name,
                file = %result.file_path.display(),
                success = result.success()
            );
            self.persist(&result);
            results.push(result);
        }
        results
    }

    fn persist(&mut self, result: &ExecutionResult) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.record_execution(&result.to_record()) {
                log_workflow_warn!("Failed to persist execution", rule = %result.rule_name, error = %e);
            }
        }
        if self.log.len() == EXECUTION_LOG_LIMIT {
            self.log.pop_front();
        }
        self.log.push_back(result.clone());
    }

    fn run_action(
        &self,
        action: &ActionSpec,
        current: &mut PathBuf,
        backup: Option<&dyn BackupHook>,
    ) -> ActionOutcome {
        let kind = action.kind();
        match action {
            ActionSpec::Move { destination } => match self.move_into(current, destination) {
                Ok(to) => {
                    *current = to;
                    ActionOutcome::ok(kind, current.display().to_string())
                }
                Err(e) => ActionOutcome::error(kind, e),
            },
            ActionSpec::Tag { value } => ActionOutcome::ok(kind, value.clone()),
            ActionSpec::VaultBackup => match backup {
                Some(hook) => match hook.backup(current) {
                    Ok(blob_id) => ActionOutcome::ok(kind, blob_id),
                    Err(e) => ActionOutcome::error(kind, format!("{:#}", e)),
                },
                None => ActionOutcome::skipped(kind, "no vault"),
            },
            ActionSpec::Unzip => {
                if dotted_extension(current).to_lowercase() != ".zip" {
                    return ActionOutcome::skipped(kind, "not a zip archive");
                }
                match convert::unzip(current) {
                    Ok((out, _)) => ActionOutcome::ok(kind, out.display().to_string()),
                    Err(e) => ActionOutcome::error(kind, e),
                }
            }
            ActionSpec::ConvertToPdf => {
                let ext = dotted_extension(current).to_lowercase();
                if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                    return ActionOutcome::skipped(kind, "not an image");
                }
                match convert::image_to_pdf(current) {
                    Ok(pdf) => ActionOutcome::ok(kind, pdf.display().to_string()),
                    Err(e) => ActionOutcome::error(kind, e),
                }
            }
        }
    }

    /// `organized/destination/name`, suffixed `{stem}_{n}` on collision.
    fn move_into(&self, from: &Path, destination: &str) -> std::io::Result<PathBuf> {
        let dir = self.organized_root.join(destination);
        std::fs::create_dir_all(&dir)?;
        let stem = from
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = dotted_extension(from);
        place_without_clobber(&dir, &stem, &ext, |to| self.mover.move_file(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Returns fixed text and counts calls.
    struct CountingExtractor {
        text: String,
        calls: Arc<AtomicUsize>,
    }

    impl TextExtractor for CountingExtractor {
        fn extract(&self, _path: &Path) -> std::io::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.clone())
        }
    }

    fn engine(rules: Vec<RuleSpec>, root: &Path, text: &str) -> (WorkflowEngine, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = WorkflowEngine::new(rules, root).with_extractor(Box::new(CountingExtractor {
            text: text.to_string(),
            calls: calls.clone(),
        }));
        (engine, calls)
    }

    fn rule(name: &str, kind: TriggerKind, value: &str, actions: Vec<ActionSpec>) -> RuleSpec {
        RuleSpec {
            name: name.to_string(),
            trigger_type: kind,
            trigger_value: value.to_string(),
            actions,
            enabled: true,
        }
    }

    fn mv(dest: &str) -> ActionSpec {
        ActionSpec::Move {
            destination: dest.to_string(),
        }
    }

    #[test]
    fn test_move_updates_reference_for_later_actions() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("bill.txt");
        fs::write(&file, "amount due: 10").unwrap();

        let seen = Mutex::new(Vec::new());
        let record = |p: &Path| -> anyhow::Result<String> {
            seen.lock().unwrap().push(p.to_path_buf());
            Ok("blob-1".to_string())
        };
        let hook: &dyn BackupHook = &record;

        let rules = vec![rule(
            "bills",
            TriggerKind::ContentMatch,
            "amount due",
            vec![mv("Expenses"), ActionSpec::VaultBackup],
        )];
        let (mut engine, _) = engine(rules, &temp.path().join("org"), "Amount Due: 10");
        let results = engine.evaluate(&file, Some(hook));

        let expected = temp.path().join("org/Expenses/bill.txt");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_path, expected);
        assert_eq!(seen.lock().unwrap().as_slice(), &[expected.clone()]);
        assert_eq!(results[0].actions[1].detail, "blob-1");
        assert!(expected.exists());
        assert!(!file.exists());
    }

    #[test]
    fn test_failing_action_does_not_abort_rule_or_other_rules() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("broken.zip");
        fs::write(&file, b"not really a zip").unwrap();

        let rules = vec![
            rule(
                "unzip",
                TriggerKind::ExtensionMatch,
                " .ZIP , .tar",
                vec![ActionSpec::Unzip, ActionSpec::Tag { value: "archive".into() }],
            ),
            rule("name", TriggerKind::FilenameMatch, "^BROKEN", vec![ActionSpec::Tag {
                value: "seen".into(),
            }]),
        ];
        let (mut engine, calls) = engine(rules, temp.path(), "");
        let results = engine.evaluate(&file, None);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].actions[0].status, StepStatus::Error);
        assert_eq!(results[0].actions[1].status, StepStatus::Ok);
        assert!(!results[0].success());
        assert!(results[1].success());
        // No content rule, no extraction.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_content_extracted_once() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("doc.txt");
        fs::write(&file, "x").unwrap();

        let rules = vec![
            rule("a", TriggerKind::ContentMatch, "invoice", vec![ActionSpec::Tag { value: "a".into() }]),
            rule("b", TriggerKind::ContentMatch, "total", vec![ActionSpec::Tag { value: "b".into() }]),
            rule("c", TriggerKind::ContentMatch, "absent", vec![]),
        ];
        let (mut engine, calls) = engine(rules, temp.path(), "Invoice TOTAL");
        let results = engine.evaluate(&file, None);

        assert_eq!(results.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backup_without_vault_is_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("r.txt");
        fs::write(&file, "receipt").unwrap();

        let rules = vec![rule("r", TriggerKind::FilenameMatch, "r", vec![ActionSpec::VaultBackup])];
        let (mut engine, _) = engine(rules, temp.path(), "");
        let results = engine.evaluate(&file, None);
        assert_eq!(results[0].actions[0].status, StepStatus::Skipped);
        assert_eq!(results[0].actions[0].detail, "no vault");
    }

    #[test]
    fn test_move_collision_suffix() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("org");
        fs::create_dir_all(root.join("Inbox")).unwrap();
        fs::write(root.join("Inbox/a.txt"), "old").unwrap();
        let file = temp.path().join("a.txt");
        fs::write(&file, "new").unwrap();

        let rules = vec![rule("m", TriggerKind::ExtensionMatch, "txt,.txt", vec![mv("Inbox")])];
        let (mut engine, _) = engine(rules, &root, "");
        let results = engine.evaluate(&file, None);

        assert_eq!(results[0].file_path, root.join("Inbox/a_1.txt"));
        assert_eq!(fs::read_to_string(root.join("Inbox/a.txt")).unwrap(), "old");
    }

    #[test]
    fn test_invalid_regex_matches_literally() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("report(1.txt");
        fs::write(&file, "x").unwrap();

        let rules = vec![rule("lit", TriggerKind::FilenameMatch, "report(", vec![])];
        let (mut engine, _) = engine(rules, temp.path(), "");
        assert_eq!(engine.evaluate(&file, None).len(), 1);
    }

    #[test]
    fn test_rule_management() {
        let temp = tempfile::tempdir().unwrap();
        let (mut engine, _) = engine(default_rules(), temp.path(), "");
        assert_eq!(engine.rules().len(), 4);
        assert!(!engine.rule("Screenshot to PDF").unwrap().enabled);

        assert!(engine.toggle_rule("Screenshot to PDF", true).unwrap());
        assert!(!engine.toggle_rule("missing", true).unwrap());

        let mut replacement = engine.rule("Auto-Unzip Archives").unwrap().clone();
        replacement.trigger_value = ".zip,.jar".into();
        engine.add_rule(replacement).unwrap();
        assert_eq!(engine.rules().len(), 4);
        assert_eq!(engine.rule("Auto-Unzip Archives").unwrap().trigger_value, ".zip,.jar");

        assert!(engine.remove_rule("Expenses Trigger").unwrap());
        assert!(!engine.remove_rule("Expenses Trigger").unwrap());
        assert!(matches!(
            engine.rule("Expenses Trigger"),
            Err(WorkflowError::UnknownRule(_))
        ));
    }

    #[test]
    fn test_missing_file_yields_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let (mut engine, calls) = engine(default_rules(), temp.path(), "invoice total");
        assert!(engine.evaluate(&temp.path().join("gone.pdf"), None).is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_execution_log_keeps_latest() {
        let temp = tempfile::tempdir().unwrap();
        let rules = vec![rule("t", TriggerKind::ExtensionMatch, ".txt", vec![])];
        let (mut engine, _) = engine(rules, temp.path(), "");
        for i in 0..(EXECUTION_LOG_LIMIT + 5) {
            let file = temp.path().join(format!("f{}.txt", i));
            fs::write(&file, "x").unwrap();
            engine.evaluate(&file, None);
        }
        let log = engine.execution_log(1000);
        assert_eq!(log.len(), EXECUTION_LOG_LIMIT);
        assert!(log[0].file_path.ends_with("f5.txt"));
        assert_eq!(engine.execution_log(2).len(), 2);
    }
}
