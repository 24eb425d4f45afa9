//! Repository access control.
//!
//! # Responsibilities
//! - Decide whether a subject may perform an action on a repository
//! - Evaluate the rules from the current `LiveConfig`, so reloads apply to
//!   the next request
//!
//! # Design Decisions
//! - The most specific repository pattern decides; patterns are not merged
//! - Admin policy applies to every repository
//! - Without rules the registry is open unless password auth is configured,
//!   in which case only authenticated subjects pass (plus anonymous reads
//!   when `allow_read_access` is set)
//! - The subject is attached to the request by an authentication layer as a
//!   [`Subject`] extension; requests without one are anonymous

use crate::config::schema::{AccessControlConfig, Policy};
use crate::security::matcher::best_match;

/// A repository operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Delete => "delete",
        }
    }
}

/// Authenticated identity of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub username: String,
}

/// Everything an access decision depends on.
#[derive(Debug, Clone, Copy)]
pub struct AccessRules<'a> {
    pub access_control: Option<&'a AccessControlConfig>,
    pub allow_read_access: bool,
    pub has_password_auth: bool,
}

fn grants(actions: &[String], action: Action) -> bool {
    actions.iter().any(|a| a.eq_ignore_ascii_case(action.as_str()))
}

fn policy_grants(policy: &Policy, username: &str, action: Action) -> bool {
    policy.users.iter().any(|u| u == username) && grants(&policy.actions, action)
}

impl AccessRules<'_> {
    /// Whether `subject` (or an anonymous client) may perform `action` on `repo`.
    pub fn is_allowed(&self, subject: Option<&Subject>, repo: &str, action: Action) -> bool {
        if action == Action::Read && subject.is_none() && self.allow_read_access {
            return true;
        }

        let Some(ac) = self.access_control else {
            return subject.is_some() || !self.has_password_auth;
        };

        if let (Some(subject), Some(admin)) = (subject, &ac.admin_policy) {
            if policy_grants(admin, &subject.username, action) {
                return true;
            }
        }

        let Some(pattern) = best_match(ac.repositories.keys(), repo) else {
            return false;
        };
        let Some(group) = ac.repositories.get(pattern) else {
            return false;
        };

        match subject {
            Some(subject) => {
                group
                    .policies
                    .iter()
                    .any(|p| policy_grants(p, &subject.username, action))
                    || grants(&group.default_policy, action)
            }
            None => grants(&group.anonymous_policy, action),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::PolicyGroup;
    use std::collections::BTreeMap;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> AccessControlConfig {
        let mut repositories = BTreeMap::new();
        repositories.insert(
            "**".to_string(),
            PolicyGroup {
                policies: vec![],
                default_policy: strings(&["read"]),
                anonymous_policy: vec![],
            },
        );
        repositories.insert(
            "team/**".to_string(),
            PolicyGroup {
                policies: vec![Policy {
                    users: strings(&["alice"]),
                    actions: strings(&["read", "create"]),
                }],
                default_policy: vec![],
                anonymous_policy: strings(&["read"]),
            },
        );
        AccessControlConfig {
            repositories,
            admin_policy: Some(Policy {
                users: strings(&["root"]),
                actions: strings(&["read", "create", "update", "delete"]),
            }),
        }
    }

    fn user(name: &str) -> Subject {
        Subject {
            username: name.to_string(),
        }
    }

    #[test]
    fn open_registry_without_rules_or_auth() {
        let rules = AccessRules {
            access_control: None,
            allow_read_access: false,
            has_password_auth: false,
        };
        assert!(rules.is_allowed(None, "any/repo", Action::Delete));
    }

    #[test]
    fn password_auth_without_rules() {
        let rules = AccessRules {
            access_control: None,
            allow_read_access: true,
            has_password_auth: true,
        };
        assert!(rules.is_allowed(None, "repo", Action::Read));
        assert!(!rules.is_allowed(None, "repo", Action::Create));
        assert!(rules.is_allowed(Some(&user("bob")), "repo", Action::Create));
    }

    #[test]
    fn most_specific_group_decides() {
        let ac = sample();
        let rules = AccessRules {
            access_control: Some(&ac),
            allow_read_access: false,
            has_password_auth: true,
        };

        assert!(rules.is_allowed(Some(&user("alice")), "team/app", Action::Create));
        assert!(!rules.is_allowed(Some(&user("bob")), "team/app", Action::Read));
        assert!(rules.is_allowed(None, "team/app", Action::Read));

        assert!(rules.is_allowed(Some(&user("bob")), "other", Action::Read));
        assert!(!rules.is_allowed(None, "other", Action::Read));
    }

    #[test]
    fn admin_policy_applies_everywhere() {
        let ac = sample();
        let rules = AccessRules {
            access_control: Some(&ac),
            allow_read_access: false,
            has_password_auth: true,
        };
        assert!(rules.is_allowed(Some(&user("root")), "team/app", Action::Delete));
        assert!(!rules.is_allowed(Some(&user("alice")), "team/app", Action::Delete));
    }
}
