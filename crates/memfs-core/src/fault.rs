// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fault injection policy + runtime controller for allocation failures

use serde::{Deserialize, Serialize};

use crate::FsError;

/// Allocation sites that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOp {
    /// Allocation of a new node in the node store
    AllocateNode,
    /// Growth of a regular file's or symlink's content buffer
    AllocateContent,
}

/// Individual rule describing which allocation should fail and how often.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaultRule {
    pub op: FaultOp,
    /// Number of leading invocations to let through before injecting faults.
    #[serde(default)]
    pub start_after: u64,
    /// Maximum number of injected failures for this rule.
    #[serde(default)]
    pub max_faults: Option<u64>,
}

/// Serializable fault policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaultPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<FaultRule>,
}

impl FaultPolicy {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Policy failing every allocation of `op` after `start_after` successes.
    pub fn fail_after(op: FaultOp, start_after: u64) -> Self {
        Self {
            enabled: true,
            rules: vec![FaultRule {
                op,
                start_after,
                max_faults: None,
            }],
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.rules.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
struct RuleCounters {
    hits: u64,
    invocations: u64,
}

/// Runtime controller that tracks policy + hit counts.
#[derive(Debug, Default)]
pub struct FaultInjector {
    policy: FaultPolicy,
    counters: Vec<RuleCounters>,
}

impl FaultInjector {
    pub fn new(policy: FaultPolicy) -> Self {
        let mut injector = Self::default();
        injector.set_policy(policy);
        injector
    }

    pub fn policy(&self) -> &FaultPolicy {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: FaultPolicy) {
        self.counters = vec![RuleCounters::default(); policy.rules.len()];
        self.policy = policy;
    }

    pub fn clear(&mut self) {
        self.set_policy(FaultPolicy::default());
    }

    /// Total number of faults injected since the policy was installed.
    pub fn injected(&self) -> u64 {
        self.counters.iter().map(|c| c.hits).sum()
    }

    /// Record an allocation attempt at `op`, failing it if a rule fires.
    pub fn check(&mut self, op: FaultOp) -> Result<(), FsError> {
        if !self.policy.enabled {
            return Ok(());
        }
        for (rule, counters) in self.policy.rules.iter().zip(self.counters.iter_mut()) {
            if rule.op != op {
                continue;
            }
            counters.invocations = counters.invocations.saturating_add(1);
            if counters.invocations <= rule.start_after {
                continue;
            }
            if let Some(max) = rule.max_faults {
                if counters.hits >= max {
                    continue;
                }
            }
            counters.hits = counters.hits.saturating_add(1);
            tracing::trace!(?op, hits = counters.hits, "injecting allocation failure");
            return Err(FsError::OutOfMemory);
        }
        Ok(())
    }
}
