//! Transition rule table: the entire policy of the engine.
//!
//! A rule maps `(current_status, action, role)` to the next status. Lookup is
//! an exact match with one hard-coded dispensation: a superuser satisfies any
//! role slot. No wildcarding, no inference; if no rule matches the attempt
//! fails and the document stays put.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use sled::Db;

use crate::error::WorkflowError;
use crate::status::{bump_registry_version, registry_version};
use crate::user::User;

const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, minicbor::Encode, minicbor::Decode)]
pub enum Action {
    #[n(0)]
    Approve,
    #[n(1)]
    Reject,
    #[n(2)]
    RaiseObjection,
    #[n(3)]
    ResolveObjection,
    #[n(4)]
    Pay,
    #[n(5)]
    Forward,
    #[n(6)]
    Expire,
}

impl Action {
    /// Stable wire code used in storage keys and audit remarks.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::Reject => "REJECT",
            Self::RaiseObjection => "RAISE_OBJECTION",
            Self::ResolveObjection => "RESOLVE_OBJECTION",
            Self::Pay => "PAY",
            Self::Forward => "FORWARD",
            Self::Expire => "EXPIRE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "APPROVE" => Some(Self::Approve),
            "REJECT" => Some(Self::Reject),
            "RAISE_OBJECTION" => Some(Self::RaiseObjection),
            "RESOLVE_OBJECTION" => Some(Self::ResolveObjection),
            "PAY" => Some(Self::Pay),
            "FORWARD" => Some(Self::Forward),
            "EXPIRE" => Some(Self::Expire),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct TransitionRule {
    #[n(0)]
    pub current_status: String,
    #[n(1)]
    pub action: Action,
    #[n(2)]
    pub role: String,
    #[n(3)]
    pub next_status: String,
    /// Opaque predicate tag; carried through untouched.
    #[n(4)]
    pub condition: Option<String>,
}

impl TransitionRule {
    pub fn new(current: &str, action: Action, role: &str, next: &str) -> Self {
        Self {
            current_status: current.to_string(),
            action,
            role: role.to_string(),
            next_status: next.to_string(),
            condition: None,
        }
    }

    fn storage_key(&self) -> Vec<u8> {
        rule_key(&self.current_status, self.action, &self.role)
    }
}

fn rule_key(current: &str, action: Action, role: &str) -> Vec<u8> {
    format!("rule/{current}|{}|{role}", action.code()).into_bytes()
}

struct Cache {
    rules: Vec<TransitionRule>,
    loaded_at: Option<Instant>,
    version: u64,
}

pub struct RuleTable {
    db: Arc<Db>,
    cache: RwLock<Cache>,
}

impl RuleTable {
    pub fn new(db: Arc<Db>) -> Self {
        Self {
            db,
            cache: RwLock::new(Cache {
                rules: Vec::new(),
                loaded_at: None,
                version: 0,
            }),
        }
    }

    /// The hot path: resolve the rule governing `(current, action, actor)`.
    ///
    /// A superuser matches any role slot. When that dispensation makes more
    /// than one rule apply the attempt is ambiguous and fails; uniqueness on
    /// the triple is a hard invariant, never resolved by precedence.
    pub fn lookup(
        &self,
        current: &str,
        action: Action,
        actor: &User,
    ) -> Result<TransitionRule, WorkflowError> {
        self.refresh_if_stale()?;
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());

        let matches: Vec<&TransitionRule> = cache
            .rules
            .iter()
            .filter(|r| {
                r.current_status == current
                    && r.action == action
                    && (r.role == actor.role || actor.is_superuser)
            })
            .collect();

        match matches.as_slice() {
            [] => Err(WorkflowError::TransitionNotPermitted {
                status: current.to_string(),
                action: action.code().to_string(),
                role: actor.role.clone(),
            }),
            [rule] => Ok((*rule).clone()),
            _ => {
                tracing::error!(
                    status = current,
                    action = action.code(),
                    "multiple rules match one attempt"
                );
                Err(WorkflowError::RuleConfiguration(format!(
                    "ambiguous rules from '{current}' on {action}"
                )))
            }
        }
    }

    /// Actions the given actor could take from `current`. Dashboards use
    /// this to render controls and to derive the `pending` bucket.
    pub fn allowed_actions(&self, current: &str, actor: &User) -> Result<Vec<Action>, WorkflowError> {
        self.refresh_if_stale()?;
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        let mut actions: Vec<Action> = cache
            .rules
            .iter()
            .filter(|r| r.current_status == current && (r.role == actor.role || actor.is_superuser))
            .map(|r| r.action)
            .collect();
        actions.sort();
        actions.dedup();
        Ok(actions)
    }

    /// All rules leaving `current`, regardless of role. Debugging surface.
    pub fn rules_from(&self, current: &str) -> Result<Vec<TransitionRule>, WorkflowError> {
        self.refresh_if_stale()?;
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        Ok(cache
            .rules
            .iter()
            .filter(|r| r.current_status == current)
            .cloned()
            .collect())
    }

    /// Roles holding at least one rule out of `status`. The first one (in
    /// code order) is recorded as `forwarded_to` on audit entries.
    pub fn roles_at(&self, status: &str) -> Result<Vec<String>, WorkflowError> {
        self.refresh_if_stale()?;
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        let mut roles: Vec<String> = cache
            .rules
            .iter()
            .filter(|r| r.current_status == status)
            .map(|r| r.role.clone())
            .collect();
        roles.sort();
        roles.dedup();
        Ok(roles)
    }

    /// Seeding-only write path. Uniqueness on `(current, action, role)` is a
    /// hard invariant; a second rule for the same key is misconfiguration.
    pub fn insert(&self, rule: TransitionRule) -> Result<(), WorkflowError> {
        let key = rule.storage_key();
        if self.db.get(&key)?.is_some() {
            return Err(WorkflowError::RuleConfiguration(format!(
                "duplicate rule ({}, {}, {})",
                rule.current_status, rule.action, rule.role
            )));
        }
        let bytes = minicbor::to_vec(&rule)?;
        self.db.insert(key, bytes)?;
        bump_registry_version(&self.db)?;
        self.invalidate();
        Ok(())
    }

    pub fn invalidate(&self) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.loaded_at = None;
    }

    fn refresh_if_stale(&self) -> Result<(), WorkflowError> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(at) = cache.loaded_at {
                if at.elapsed() < CACHE_TTL {
                    return Ok(());
                }
            }
        }

        // TTL elapsed; an unchanged version means only the clock moved
        let version = registry_version(&self.db)?;
        {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            if cache.loaded_at.is_some() && cache.version == version {
                cache.loaded_at = Some(Instant::now());
                return Ok(());
            }
        }

        let mut rules = Vec::new();
        for item in self.db.scan_prefix(b"rule/") {
            let (_, value) = item?;
            let rule: TransitionRule = minicbor::decode(&value)?;
            rules.push(rule);
        }

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.rules = rules;
        cache.loaded_at = Some(Instant::now());
        cache.version = version;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::ROLE_SUPERUSER;
    use std::sync::Arc;

    fn mem_table() -> RuleTable {
        let db = sled::Config::new().temporary(true).open().unwrap();
        RuleTable::new(Arc::new(db))
    }

    #[test]
    fn lookup_is_exact_match() {
        let table = mem_table();
        table
            .insert(TransitionRule::new("level_1", Action::Approve, "level_1", "level_2"))
            .unwrap();

        let clerk = User::with_role("level_1");
        let rule = table.lookup("level_1", Action::Approve, &clerk).unwrap();
        assert_eq!(rule.next_status, "level_2");

        let stranger = User::with_role("level_3");
        let err = table.lookup("level_1", Action::Approve, &stranger).unwrap_err();
        assert_eq!(err.code(), "transition_not_permitted");
    }

    #[test]
    fn superuser_satisfies_any_role_slot() {
        let table = mem_table();
        table
            .insert(TransitionRule::new("level_1", Action::Approve, "level_1", "level_2"))
            .unwrap();

        let root = User::with_role(ROLE_SUPERUSER);
        let rule = table.lookup("level_1", Action::Approve, &root).unwrap();
        assert_eq!(rule.next_status, "level_2");
    }

    #[test]
    fn duplicate_rule_is_configuration_error() {
        let table = mem_table();
        let rule = TransitionRule::new("level_1", Action::Approve, "level_1", "level_2");
        table.insert(rule.clone()).unwrap();

        let err = table.insert(rule).unwrap_err();
        assert_eq!(err.code(), "rule_configuration_error");
    }

    #[test]
    fn superuser_multi_match_is_configuration_error() {
        let table = mem_table();
        table
            .insert(TransitionRule::new("level_1", Action::Approve, "level_1", "level_2"))
            .unwrap();
        // same destination; still two rules matching one attempt
        table
            .insert(TransitionRule::new("level_1", Action::Approve, "auditor", "level_2"))
            .unwrap();

        let root = User::with_role(ROLE_SUPERUSER);
        let err = table.lookup("level_1", Action::Approve, &root).unwrap_err();
        assert_eq!(err.code(), "rule_configuration_error");

        // an exact single match is unaffected by the extra role's rule
        let clerk = User::with_role("level_1");
        assert!(table.lookup("level_1", Action::Approve, &clerk).is_ok());
    }
}
