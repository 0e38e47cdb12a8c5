//! Cache region addressing.
//!
//! Defines `BaseKey`, the closed set of read-model base keys, and
//! `CacheRegion`, the addressable unit of cached data (a base key plus an
//! optional entity scope).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Base key of a cache region.
///
/// The read model is partitioned into a fixed set of server-derived regions.
/// Keeping the set closed means the invalidation catalog cannot reference a
/// key the store does not understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BaseKey {
    // Dashboard
    FinancialDashboard,
    KpiSummary,
    KpiHistorical,

    // Clients and pipeline
    FinancialClients,
    ClientPortfolios,
    PipelineOverview,
    PipelineStages,

    // Portfolios
    FinancialPortfolios,
    PortfolioHoldings,
    PortfolioPerformance,

    // Scenarios
    FinancialScenarios,
    LatestScenario,

    // Compliance
    ComplianceTasks,
    OverdueTasks,
    TaskTemplates,

    // Notifications
    EnhancedNotifications,
}

impl BaseKey {
    /// Every declared base key, for exhaustive catalog checks.
    pub const ALL: [BaseKey; 16] = [
        BaseKey::FinancialDashboard,
        BaseKey::KpiSummary,
        BaseKey::KpiHistorical,
        BaseKey::FinancialClients,
        BaseKey::ClientPortfolios,
        BaseKey::PipelineOverview,
        BaseKey::PipelineStages,
        BaseKey::FinancialPortfolios,
        BaseKey::PortfolioHoldings,
        BaseKey::PortfolioPerformance,
        BaseKey::FinancialScenarios,
        BaseKey::LatestScenario,
        BaseKey::ComplianceTasks,
        BaseKey::OverdueTasks,
        BaseKey::TaskTemplates,
        BaseKey::EnhancedNotifications,
    ];

    /// Kebab-case wire/display form of the key.
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseKey::FinancialDashboard => "financial-dashboard",
            BaseKey::KpiSummary => "kpi-summary",
            BaseKey::KpiHistorical => "kpi-historical",
            BaseKey::FinancialClients => "financial-clients",
            BaseKey::ClientPortfolios => "client-portfolios",
            BaseKey::PipelineOverview => "pipeline-overview",
            BaseKey::PipelineStages => "pipeline-stages",
            BaseKey::FinancialPortfolios => "financial-portfolios",
            BaseKey::PortfolioHoldings => "portfolio-holdings",
            BaseKey::PortfolioPerformance => "portfolio-performance",
            BaseKey::FinancialScenarios => "financial-scenarios",
            BaseKey::LatestScenario => "latest-scenario",
            BaseKey::ComplianceTasks => "compliance-tasks",
            BaseKey::OverdueTasks => "overdue-tasks",
            BaseKey::TaskTemplates => "task-templates",
            BaseKey::EnhancedNotifications => "enhanced-notifications",
        }
    }
}

impl fmt::Display for BaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An addressable unit of cached data.
///
/// Two regions are equal iff both components match. A region without a scope
/// addresses every instance of its base key; a scoped region addresses one
/// entity's slice (e.g. one client's portfolios).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheRegion {
    /// The base key this region belongs to.
    pub base: BaseKey,
    /// Entity identifier qualifying the region, if any.
    pub scope: Option<String>,
}

impl CacheRegion {
    /// A region covering all instances of `base`.
    pub fn unscoped(base: BaseKey) -> Self {
        Self { base, scope: None }
    }

    /// A region qualified by an entity identifier.
    pub fn scoped(base: BaseKey, scope: impl Into<String>) -> Self {
        Self {
            base,
            scope: Some(scope.into()),
        }
    }

    /// Whether the region carries an entity scope.
    pub fn is_scoped(&self) -> bool {
        self.scope.is_some()
    }

    /// Whether an invalidation of `self` reaches `other`.
    ///
    /// An unscoped region covers every entry sharing its base key; a scoped
    /// region covers only the exact pair.
    pub fn covers(&self, other: &CacheRegion) -> bool {
        if self.base != other.base {
            return false;
        }
        match &self.scope {
            None => true,
            Some(scope) => other.scope.as_deref() == Some(scope.as_str()),
        }
    }
}

impl fmt::Display for CacheRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}:{}", self.base, scope),
            None => write!(f, "{}", self.base),
        }
    }
}
