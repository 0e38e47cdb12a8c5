//! Declarative event-to-invalidation catalog.
//!
//! Maps each event type to the cache regions it must invalidate, split into
//! three roles: `primary` regions named by the event itself, `scoped` regions
//! additionally invalidated per entity carried in the payload, and
//! `dependent` regions refreshed as a side effect.
//!
//! The catalog is static data compiled into the crate. The lookup is an
//! exhaustive match over the closed [`EventType`] enum, so declaring a new
//! event type without deciding its rule fails to compile; event types with
//! no cache impact map to `None` explicitly.

use crate::events::EventType;
use crate::keys::BaseKey;

/// Cache regions one event type must invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationRule {
    /// Unscoped regions invalidated whenever the event fires.
    pub primary: &'static [BaseKey],
    /// Base keys additionally invalidated as `(key, scope)` pairs when the
    /// event carries an entity identifier.
    pub scoped: &'static [BaseKey],
    /// Downstream regions invalidated as a side effect of the event.
    pub dependent: &'static [BaseKey],
}

/// Look up the invalidation rule for an event type.
///
/// `None` marks an informational event with no cache impact; callers treat
/// it as a logged no-op, never an error.
pub fn rule_for(event_type: EventType) -> Option<&'static InvalidationRule> {
    use BaseKey::*;

    match event_type {
        EventType::PortfolioUpdated => Some(&InvalidationRule {
            primary: &[
                FinancialPortfolios,
                PortfolioHoldings,
                PortfolioPerformance,
                KpiSummary,
            ],
            scoped: &[PortfolioHoldings, PortfolioPerformance],
            dependent: &[FinancialDashboard],
        }),
        EventType::HoldingAdded => Some(&InvalidationRule {
            primary: &[PortfolioHoldings, PortfolioPerformance, KpiSummary],
            scoped: &[PortfolioHoldings, PortfolioPerformance],
            dependent: &[],
        }),
        EventType::ClientCreated => Some(&InvalidationRule {
            primary: &[FinancialClients, PipelineOverview, KpiSummary],
            scoped: &[],
            dependent: &[FinancialDashboard],
        }),
        EventType::ClientUpdated => Some(&InvalidationRule {
            primary: &[
                FinancialClients,
                ClientPortfolios,
                PipelineOverview,
                KpiSummary,
            ],
            scoped: &[ClientPortfolios],
            dependent: &[FinancialDashboard, ComplianceTasks],
        }),
        EventType::ScenarioCalculated => Some(&InvalidationRule {
            primary: &[FinancialScenarios, LatestScenario, KpiSummary],
            scoped: &[LatestScenario],
            dependent: &[],
        }),
        EventType::TaskCompleted => Some(&InvalidationRule {
            primary: &[ComplianceTasks, OverdueTasks, KpiSummary],
            scoped: &[ComplianceTasks],
            dependent: &[EnhancedNotifications, FinancialDashboard],
        }),
        EventType::TaskCreated => Some(&InvalidationRule {
            primary: &[ComplianceTasks, OverdueTasks],
            scoped: &[ComplianceTasks],
            dependent: &[],
        }),
        EventType::PipelineMoved => Some(&InvalidationRule {
            primary: &[PipelineOverview, PipelineStages, KpiSummary],
            scoped: &[],
            dependent: &[FinancialDashboard, EnhancedNotifications],
        }),
        EventType::KpiUpdated => Some(&InvalidationRule {
            primary: &[KpiSummary, KpiHistorical],
            scoped: &[],
            dependent: &[],
        }),
        // Informational only; notification delivery owns its own state.
        EventType::NotificationTriggered => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_total_over_declared_event_types() {
        for event_type in EventType::ALL {
            // Every type resolves to an explicit decision; the only
            // informational type is NotificationTriggered.
            match rule_for(event_type) {
                Some(rule) => assert!(!rule.primary.is_empty(), "{event_type}: empty primary"),
                None => assert_eq!(event_type, EventType::NotificationTriggered),
            }
        }
    }

    #[test]
    fn scoped_keys_are_a_subset_of_primary() {
        for event_type in EventType::ALL {
            let Some(rule) = rule_for(event_type) else {
                continue;
            };
            for key in rule.scoped {
                assert!(
                    rule.primary.contains(key),
                    "{event_type}: scoped key {key} not in primary"
                );
            }
        }
    }

    #[test]
    fn dependent_keys_are_disjoint_from_primary() {
        for event_type in EventType::ALL {
            let Some(rule) = rule_for(event_type) else {
                continue;
            };
            for key in rule.dependent {
                assert!(
                    !rule.primary.contains(key),
                    "{event_type}: dependent key {key} duplicated in primary"
                );
            }
        }
    }

    #[test]
    fn client_created_rule_matches_documented_mapping() {
        let rule = rule_for(EventType::ClientCreated).expect("rule");

        assert_eq!(
            rule.primary,
            &[
                BaseKey::FinancialClients,
                BaseKey::PipelineOverview,
                BaseKey::KpiSummary
            ]
        );
        assert!(rule.scoped.is_empty());
        assert_eq!(rule.dependent, &[BaseKey::FinancialDashboard]);
    }

    #[test]
    fn kpi_summary_is_touched_by_most_write_events() {
        // The dashboard KPI rollup is derived from nearly everything; keep
        // the catalog honest about it.
        let kpi_touching = EventType::ALL
            .iter()
            .filter_map(|t| rule_for(*t))
            .filter(|rule| rule.primary.contains(&BaseKey::KpiSummary))
            .count();
        assert_eq!(kpi_touching, 8);
    }
}
