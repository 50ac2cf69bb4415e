// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::ids::{ActorId, ClientId, PolicyId, WorkspaceId};

/// A workspace-scoped rule mapping a tool path glob and optional actor/client
/// filters to a decision (`AccessPolicy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub id: PolicyId,
    pub workspace_id: WorkspaceId,
    pub actor_id: Option<ActorId>,
    pub client_id: Option<ClientId>,
    pub tool_path_pattern: String,
    pub decision: Decision,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    RequireApproval,
    Deny,
}

impl Decision {
    /// Combine two decisions under "worst-wins" (GraphQL extension):
    /// `deny > require_approval > allow`.
    pub fn worst(self, other: Decision) -> Decision {
        use Decision::*;
        match (self, other) {
            (Deny, _) | (_, Deny) => Deny,
            (RequireApproval, _) | (_, RequireApproval) => RequireApproval,
            _ => Allow,
        }
    }
}

/// The actor/client/tool context a policy decision is evaluated against.
#[derive(Debug, Clone)]
pub struct DecisionContext<'a> {
    pub workspace_id: WorkspaceId,
    pub actor_id: Option<&'a ActorId>,
    pub client_id: Option<&'a ClientId>,
}

/// A policy pattern compiled to a regex once, so repeated `decide` calls
/// against the same policy set don't re-parse the glob each time (spec §9:
/// "express [glob matching] as a compiled matcher ... but preserve the
/// scoring function's ordering").
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    policy: AccessPolicy,
    pattern: Regex,
    /// Count of non-`*` characters in the original glob, used by the scoring
    /// function (step 2: `max(1, |pattern with '*' removed|)`).
    specificity: usize,
}

impl CompiledPolicy {
    pub fn compile(policy: AccessPolicy) -> Self {
        let specificity = policy
            .tool_path_pattern
            .chars()
            .filter(|c| *c != '*')
            .count()
            .max(1);
        let pattern = glob_to_regex(&policy.tool_path_pattern);
        Self {
            policy,
            pattern,
            specificity,
        }
    }

    fn matches(&self, ctx: &DecisionContext, tool_path: &str) -> bool {
        let actor_ok = match &self.policy.actor_id {
            None => true,
            Some(p) => ctx.actor_id.is_some_and(|a| a == p),
        };
        let client_ok = match &self.policy.client_id {
            None => true,
            Some(p) => ctx.client_id.is_some_and(|c| c == p),
        };
        actor_ok && client_ok && self.pattern.is_match(tool_path)
    }

    fn score(&self, ctx: &DecisionContext) -> i64 {
        let actor_bonus = if self
            .policy
            .actor_id
            .as_ref()
            .is_some_and(|p| ctx.actor_id == Some(p))
        {
            4
        } else {
            0
        };
        let client_bonus = if self
            .policy
            .client_id
            .as_ref()
            .is_some_and(|p| ctx.client_id == Some(p))
        {
            2
        } else {
            0
        };
        actor_bonus + client_bonus + self.specificity as i64 + self.policy.priority as i64
    }
}

/// Translate a policy glob (only `*` is a metacharacter, everything else is
/// literal — spec §4.3, §6) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Regex {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    for ch in pattern.chars() {
        if ch == '*' {
            out.push_str(".*");
        } else {
            out.push_str(&regex::escape(&ch.to_string()));
        }
    }
    out.push('$');
    // Patterns are validated at policy-creation time; a workspace's stored
    // policies are always well-formed by construction.
    Regex::new(&out).expect("glob-derived pattern is always a valid regex")
}

/// Evaluate a tool path against ordered policies for a given actor/client
/// (`Decide`). `default_requires_approval` is the tool's own static
/// `approval == "required"` default, used when no policy matches.
pub fn decide(
    tool_path: &str,
    ctx: &DecisionContext,
    policies: &[CompiledPolicy],
    default_requires_approval: bool,
) -> Decision {
    let mut best: Option<(i64, Decision)> = None;
    for candidate in policies.iter() {
        if !candidate.matches(ctx, tool_path) {
            continue;
        }
        let score = candidate.score(ctx);
        let replace = match &best {
            None => true,
            // Ties keep the earlier candidate: "ties broken by insertion
            // order" (step 2) — strict `>` preserves that.
            Some((best_score, _)) => score > *best_score,
        };
        if replace {
            best = Some((score, candidate.policy.decision));
        }
    }
    match best {
        Some((_, decision)) => decision,
        None if default_requires_approval => Decision::RequireApproval,
        None => Decision::Allow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(pattern: &str, decision: Decision, priority: i32) -> AccessPolicy {
        AccessPolicy {
            id: PolicyId::new(),
            workspace_id: WorkspaceId::new(),
            actor_id: None,
            client_id: None,
            tool_path_pattern: pattern.into(),
            decision,
            priority,
        }
    }

    fn ctx(workspace_id: WorkspaceId) -> DecisionContext<'static> {
        DecisionContext {
            workspace_id,
            actor_id: None,
            client_id: None,
        }
    }

    #[test]
    fn no_match_falls_back_to_tool_default() {
        let compiled = vec![CompiledPolicy::compile(policy("other.*", Decision::Deny, 0))];
        let workspace_id = WorkspaceId::new();
        let decision = decide("demo.ping", &ctx(workspace_id), &compiled, false);
        assert_eq!(decision, Decision::Allow);

        let decision = decide("demo.ping", &ctx(workspace_id), &compiled, true);
        assert_eq!(decision, Decision::RequireApproval);
    }

    #[test]
    fn glob_star_matches_any_run_of_characters() {
        let compiled = vec![CompiledPolicy::compile(policy("demo.*", Decision::Deny, 100))];
        let workspace_id = WorkspaceId::new();
        let decision = decide("demo.ping", &ctx(workspace_id), &compiled, false);
        assert_eq!(decision, Decision::Deny);
    }

    #[test]
    fn higher_priority_candidate_wins_on_overlap() {
        let compiled = vec![
            CompiledPolicy::compile(policy("demo.*", Decision::Deny, 0)),
            CompiledPolicy::compile(policy("demo.ping", Decision::Allow, 50)),
        ];
        let workspace_id = WorkspaceId::new();
        let decision = decide("demo.ping", &ctx(workspace_id), &compiled, false);
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn exact_actor_match_outweighs_a_broader_wildcard_policy() {
        let workspace_id = WorkspaceId::new();
        let actor = ActorId("actor-1".into());
        let mut scoped = policy("demo.*", Decision::RequireApproval, 0);
        scoped.actor_id = Some(actor.clone());
        let compiled = vec![
            CompiledPolicy::compile(policy("demo.*", Decision::Allow, 0)),
            CompiledPolicy::compile(scoped),
        ];
        let ctx = DecisionContext {
            workspace_id,
            actor_id: Some(&actor),
            client_id: None,
        };
        let decision = decide("demo.ping", &ctx, &compiled, false);
        assert_eq!(decision, Decision::RequireApproval);
    }

    #[test]
    fn worst_wins_combines_deny_over_allow() {
        assert_eq!(Decision::Allow.worst(Decision::Deny), Decision::Deny);
        assert_eq!(
            Decision::Allow.worst(Decision::RequireApproval),
            Decision::RequireApproval
        );
        assert_eq!(
            Decision::RequireApproval.worst(Decision::Allow),
            Decision::RequireApproval
        );
        assert_eq!(Decision::Allow.worst(Decision::Allow), Decision::Allow);
    }

    #[test]
    fn ties_are_broken_by_insertion_order() {
        let compiled = vec![
            CompiledPolicy::compile(policy("demo.ping", Decision::Allow, 0)),
            CompiledPolicy::compile(policy("demo.ping", Decision::Deny, 0)),
        ];
        let workspace_id = WorkspaceId::new();
        let decision = decide("demo.ping", &ctx(workspace_id), &compiled, false);
        assert_eq!(decision, Decision::Allow);
    }
}
