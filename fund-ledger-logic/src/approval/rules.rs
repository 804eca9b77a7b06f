use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{ApprovalLevel, TicketType};

/// Approval requirements for one `(ticket type, amount bracket)`.
/// The bracket is `[min_amount, max_amount)`; no `max_amount` is unbounded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalRule {
    pub ticket_type: TicketType,
    #[serde(default)]
    pub min_amount: Decimal,
    #[serde(default)]
    pub max_amount: Option<Decimal>,
    pub required_approvals: u32,
    pub required_level: ApprovalLevel,
    #[serde(default)]
    pub allowed_approvers: Vec<String>,
    pub sla_warning_hours: u32,
    pub sla_deadline_hours: u32,
}

impl ApprovalRule {
    pub fn matches(&self, ticket_type: TicketType, amount: Decimal) -> bool {
        self.ticket_type == ticket_type
            && amount >= self.min_amount
            && self.max_amount.is_none_or(|max| amount < max)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Hours after the SLA warning before the ticket escalates.
    pub escalate_after_hours: u32,
    pub notify: Vec<String>,
}

pub trait RuleTable: Send + Sync {
    fn resolve(&self, ticket_type: TicketType, amount: Decimal) -> Option<ApprovalRule>;

    fn escalation_policy(&self, ticket_type: TicketType) -> Option<EscalationPolicy>;
}

/// Rules evaluated in declaration order; the first match wins.
#[derive(Clone, Debug, Default)]
pub struct StaticRuleTable {
    rules: Vec<ApprovalRule>,
    escalation: HashMap<TicketType, EscalationPolicy>,
}

impl StaticRuleTable {
    pub fn new(
        rules: Vec<ApprovalRule>,
        escalation: impl IntoIterator<Item = (TicketType, EscalationPolicy)>,
    ) -> Self {
        Self {
            rules,
            escalation: escalation.into_iter().collect(),
        }
    }
}

impl RuleTable for StaticRuleTable {
    fn resolve(&self, ticket_type: TicketType, amount: Decimal) -> Option<ApprovalRule> {
        self.rules
            .iter()
            .find(|rule| rule.matches(ticket_type, amount))
            .cloned()
    }

    fn escalation_policy(&self, ticket_type: TicketType) -> Option<EscalationPolicy> {
        self.escalation.get(&ticket_type).cloned()
    }
}
