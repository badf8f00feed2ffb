//! Rule Evaluator: matches the current [`EvaluationContext`] against a set
//! of persisted rules and decides whether an automatic blast should fire.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::model::{EvaluationContext, NetworkState};

/// A single AND-ed condition within a [`Rule`]. Unknown discriminators
/// encountered on disk (e.g. a newer build's condition type) are skipped
/// rather than failing the whole load — see [`RuleStore::load`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    /// Matches when connected to WiFi with an SSID containing (or, with
    /// `regex: true`, matching) `pattern`.
    Ssid {
        /// Substring, or regex when `regex` is `true`, to match the
        /// observed SSID against (quote-trimmed first).
        pattern: String,
        /// When `true`, `pattern` is compiled as a regex instead of a
        /// plain substring.
        #[serde(default)]
        regex: bool,
        /// When `true`, matching is case-sensitive. Defaults to `false`
        /// (case-insensitive), since platforms disagree on SSID casing.
        #[serde(default)]
        case_sensitive: bool,
    },
    /// Matches when the time of day falls within `[start_minutes, end_minutes)`,
    /// wrapping past midnight if `end_minutes < start_minutes`.
    TimeWindow {
        /// Window start, minutes since midnight.
        start_minutes: u16,
        /// Window end, minutes since midnight.
        end_minutes: u16,
    },
    /// Matches on a set of ISO weekdays (1 = Monday .. 7 = Sunday).
    DayOfWeek {
        /// Days this condition matches.
        days: Vec<u8>,
    },
}

impl Condition {
    fn matches(&self, ctx: &EvaluationContext) -> bool {
        match self {
            Condition::Ssid { pattern, regex, case_sensitive } => {
                let NetworkState::WiFi { ssid } = &ctx.network else {
                    return false;
                };
                ssid_matches(ssid, pattern, *regex, *case_sensitive)
            }
            Condition::TimeWindow { start_minutes, end_minutes } => {
                let t = ctx.time_of_day_minutes;
                if start_minutes <= end_minutes {
                    t >= *start_minutes && t < *end_minutes
                } else {
                    t >= *start_minutes || t < *end_minutes
                }
            }
            Condition::DayOfWeek { days } => days.contains(&ctx.day_of_week),
        }
    }
}

/// Matches an observed SSID (quote-trimmed, as some platforms report it
/// wrapped in quotes) against `pattern`, either as a substring or, when
/// `regex` is set, as a compiled regular expression. An invalid regex
/// never matches rather than panicking.
fn ssid_matches(observed: &str, pattern: &str, regex: bool, case_sensitive: bool) -> bool {
    let observed = observed.trim().trim_matches('"');

    if regex {
        let built = if case_sensitive {
            Regex::new(pattern)
        } else {
            RegexBuilder::new(pattern).case_insensitive(true).build()
        };
        return built.map(|re| re.is_match(observed)).unwrap_or(false);
    }

    if case_sensitive {
        observed.contains(pattern)
    } else {
        observed.to_ascii_lowercase().contains(&pattern.to_ascii_lowercase())
    }
}

/// A persisted automation rule: fires `action` when every condition
/// matches (AND semantics; a rule with zero conditions never matches).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Stable identifier, used for debounce tracking and store updates.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this rule participates in evaluation at all.
    pub enabled: bool,
    /// AND-ed conditions; empty means the rule never matches.
    pub conditions: Vec<Condition>,
    /// Action identifier to fire when matched (e.g. `"START_BLAST"`).
    pub action: String,
    /// Unix-ms timestamp of the last time this rule fired, for debounce.
    pub last_triggered: Option<u64>,
    /// Whether this rule matched as of the previous evaluation, so a
    /// false->true transition can be detected and refire immediately even
    /// inside the cooldown window. Defaults to `false` for rules
    /// persisted before this field existed.
    #[serde(default)]
    pub was_matching: bool,
}

const DEBOUNCE_MS: u64 = 60_000;

impl Rule {
    /// Whether this rule currently matches `ctx`, ignoring debounce.
    pub fn matches(&self, ctx: &EvaluationContext) -> bool {
        self.enabled && !self.conditions.is_empty() && self.conditions.iter().all(|c| c.matches(ctx))
    }

    /// Whether this rule is past its cooldown window relative to `now_ms`.
    pub fn is_debounced(&self, now_ms: u64) -> bool {
        match self.last_triggered {
            Some(last) => now_ms.saturating_sub(last) < DEBOUNCE_MS,
            None => false,
        }
    }

    /// Whether this rule may fire given it currently matches: either the
    /// cooldown has elapsed, or the match is a fresh false->true edge
    /// (the network/time condition just started holding), which bypasses
    /// the cooldown entirely.
    fn can_refire(&self, now_ms: u64) -> bool {
        let edge = !self.was_matching;
        edge || !self.is_debounced(now_ms)
    }
}

/// Evaluates every enabled rule against `ctx` in order, returning the
/// index of the first rule that currently matches and is allowed to fire
/// (past its 60s cooldown, or on a false->true edge). Matching is
/// first-match-wins: only one rule fires per evaluation. Every rule's
/// `was_matching` is updated to reflect this evaluation regardless of
/// whether it fired, so the next call can detect edges correctly; callers
/// are expected to persist `rules` afterwards via [`RuleStore::save`].
pub fn evaluate(rules: &mut [Rule], ctx: &EvaluationContext, now_ms: u64) -> Option<usize> {
    let currently_matching: Vec<bool> = rules.iter().map(|r| r.matches(ctx)).collect();

    let mut fired = None;
    for (i, rule) in rules.iter().enumerate() {
        if currently_matching[i] && rule.can_refire(now_ms) {
            fired = Some(i);
            break;
        }
    }

    if let Some(i) = fired {
        rules[i].last_triggered = Some(now_ms);
    }
    for (rule, matching) in rules.iter_mut().zip(currently_matching) {
        rule.was_matching = matching;
    }

    fired
}

/// Tolerant container deserialized from the rule store file: unknown rule
/// shapes (e.g. an unrecognized condition discriminator) are dropped
/// individually instead of failing the whole load.
#[derive(Debug, Serialize, Deserialize, Default)]
struct RuleFile {
    rules: Vec<serde_json::Value>,
}

static STORE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn store_lock() -> &'static Mutex<()> {
    STORE_LOCK.get_or_init(|| Mutex::new(()))
}

/// Atomic JSON-backed persistence for the rule list.
#[derive(Clone)]
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    /// Creates a store backed by `path` (not read until [`Self::load`]).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads rules from disk, silently skipping entries that fail to
    /// deserialize (unknown condition type, missing field, ...) so a
    /// forward-incompatible rule doesn't take down the whole store.
    pub fn load(&self) -> Vec<Rule> {
        let _guard = store_lock().lock();
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        let Ok(file) = serde_json::from_str::<RuleFile>(&contents) else {
            return Vec::new();
        };
        file.rules
            .into_iter()
            .filter_map(|value| serde_json::from_value::<Rule>(value).ok())
            .collect()
    }

    /// Atomically persists `rules`: writes to a sibling temp file, then
    /// renames over the real path so readers never observe a partial write.
    pub fn save(&self, rules: &[Rule]) -> PipelineResult<()> {
        let _guard = store_lock().lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::RuleStore(e.to_string()))?;
        }
        let file = RuleFile {
            rules: rules
                .iter()
                .map(|r| serde_json::to_value(r).expect("Rule serializes"))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| PipelineError::RuleStore(e.to_string()))?;

        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, json).map_err(|e| PipelineError::RuleStore(e.to_string()))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| PipelineError::RuleStore(e.to_string()))?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_wifi(ssid: &str, minutes: u16, day: u8) -> EvaluationContext {
        EvaluationContext {
            network: NetworkState::WiFi { ssid: ssid.into() },
            time_of_day_minutes: minutes,
            day_of_week: day,
        }
    }

    fn ssid_condition(pattern: &str) -> Condition {
        Condition::Ssid {
            pattern: pattern.into(),
            regex: false,
            case_sensitive: false,
        }
    }

    #[test]
    fn rule_with_no_conditions_never_matches() {
        let rule = Rule {
            id: "r1".into(),
            name: "empty".into(),
            enabled: true,
            conditions: vec![],
            action: "START_BLAST".into(),
            last_triggered: None,
            was_matching: false,
        };
        assert!(!rule.matches(&ctx_wifi("home", 600, 1)));
    }

    #[test]
    fn and_semantics_require_every_condition() {
        let rule = Rule {
            id: "r2".into(),
            name: "morning-home".into(),
            enabled: true,
            conditions: vec![
                ssid_condition("home"),
                Condition::TimeWindow { start_minutes: 420, end_minutes: 540 },
            ],
            action: "START_BLAST".into(),
            last_triggered: None,
            was_matching: false,
        };
        assert!(rule.matches(&ctx_wifi("home", 480, 1)));
        assert!(!rule.matches(&ctx_wifi("work", 480, 1)));
        assert!(!rule.matches(&ctx_wifi("home", 700, 1)));
    }

    #[test]
    fn ssid_condition_matches_by_substring_case_insensitively() {
        let condition = ssid_condition("Office");
        assert!(condition.matches(&ctx_wifi("OfficeNet", 0, 1)));
        assert!(condition.matches(&ctx_wifi("my-office-5g", 0, 1)));
        assert!(!condition.matches(&ctx_wifi("HomeNet", 0, 1)));
    }

    #[test]
    fn ssid_condition_trims_surrounding_quotes() {
        let condition = ssid_condition("home");
        assert!(condition.matches(&ctx_wifi("\"home\"", 0, 1)));
    }

    #[test]
    fn ssid_condition_supports_regex_matching() {
        let condition = Condition::Ssid {
            pattern: "^Guest-[0-9]+$".into(),
            regex: true,
            case_sensitive: true,
        };
        assert!(condition.matches(&ctx_wifi("Guest-42", 0, 1)));
        assert!(!condition.matches(&ctx_wifi("guest-42", 0, 1)));
        assert!(!condition.matches(&ctx_wifi("Guest-abc", 0, 1)));
    }

    #[test]
    fn time_window_wraps_past_midnight() {
        let condition = Condition::TimeWindow { start_minutes: 1380, end_minutes: 60 };
        assert!(condition.matches(&ctx_wifi("home", 1400, 1)));
        assert!(condition.matches(&ctx_wifi("home", 30, 1)));
        assert!(!condition.matches(&ctx_wifi("home", 700, 1)));
    }

    #[test]
    fn debounce_blocks_retrigger_within_60s() {
        let rule = Rule {
            id: "r3".into(),
            name: "debounced".into(),
            enabled: true,
            conditions: vec![Condition::DayOfWeek { days: vec![1] }],
            action: "START_BLAST".into(),
            last_triggered: Some(1_000_000),
            was_matching: true,
        };
        assert!(rule.is_debounced(1_000_000 + 30_000));
        assert!(!rule.is_debounced(1_000_000 + 60_001));
    }

    #[test]
    fn evaluate_returns_first_matching_rule() {
        let mut rules = vec![
            Rule {
                id: "a".into(),
                name: "a".into(),
                enabled: true,
                conditions: vec![Condition::DayOfWeek { days: vec![2] }],
                action: "NOPE".into(),
                last_triggered: None,
                was_matching: false,
            },
            Rule {
                id: "b".into(),
                name: "b".into(),
                enabled: true,
                conditions: vec![Condition::DayOfWeek { days: vec![1] }],
                action: "START_BLAST".into(),
                last_triggered: None,
                was_matching: false,
            },
        ];
        let matched = evaluate(&mut rules, &ctx_wifi("home", 0, 1), 0).unwrap();
        assert_eq!(rules[matched].id, "b");
    }

    #[test]
    fn edge_triggered_match_refires_inside_cooldown() {
        let mut rules = vec![Rule {
            id: "r".into(),
            name: "r".into(),
            enabled: true,
            conditions: vec![Condition::DayOfWeek { days: vec![1] }],
            action: "START_BLAST".into(),
            last_triggered: Some(1_000_000),
            was_matching: false,
        }];
        // Still within the 60s cooldown, but this is a fresh false->true
        // edge, so it should fire anyway.
        let fired = evaluate(&mut rules, &ctx_wifi("home", 0, 1), 1_000_030_000);
        assert_eq!(fired, Some(0));
        assert!(rules[0].was_matching);
    }

    #[test]
    fn cooldown_blocks_refire_while_continuously_matching() {
        let mut rules = vec![Rule {
            id: "r".into(),
            name: "r".into(),
            enabled: true,
            conditions: vec![Condition::DayOfWeek { days: vec![1] }],
            action: "START_BLAST".into(),
            last_triggered: Some(1_000_000),
            was_matching: true,
        }];
        let fired = evaluate(&mut rules, &ctx_wifi("home", 0, 1), 1_000_030_000);
        assert_eq!(fired, None);
    }

    #[test]
    fn store_round_trips_rules_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("rules.json"));
        let rules = vec![Rule {
            id: "x".into(),
            name: "x".into(),
            enabled: true,
            conditions: vec![ssid_condition("home")],
            action: "START_BLAST".into(),
            last_triggered: None,
            was_matching: false,
        }];
        store.save(&rules).unwrap();
        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "x");
    }

    #[test]
    fn store_skips_unknown_condition_type_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let raw = serde_json::json!({
            "rules": [
                {
                    "id": "good",
                    "name": "good",
                    "enabled": true,
                    "conditions": [{"type": "ssid", "pattern": "home"}],
                    "action": "START_BLAST",
                    "last_triggered": null
                },
                {
                    "id": "bad",
                    "name": "bad",
                    "enabled": true,
                    "conditions": [{"type": "unknownFutureCondition", "foo": "bar"}],
                    "action": "START_BLAST",
                    "last_triggered": null
                }
            ]
        });
        fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();
        let store = RuleStore::new(path);
        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "good");
    }
}
