//! Destination venue selection
//!
//! Route advice comes from an external, best-effort service. The resolver
//! bounds it with a timeout and falls back to a static asset-class mapping.

use crate::config::RoutesConfig;
use crate::escrow::types::decimal;
use crate::escrow::{AssetRef, ChainId};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Where the destination leg should settle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecommendation {
    /// Asset on the destination chain
    pub destination_venue: AssetRef,
    pub rationale: String,
    #[serde(with = "decimal")]
    pub estimated_cost: u128,
    /// Produced by the static fallback
    #[serde(default)]
    pub fallback: bool,
}

/// Swap context handed to the advisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteContext {
    pub source_chain: ChainId,
    pub dest_chain: ChainId,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Route advisor unavailable: {0}")]
    Unavailable(String),
}

/// External route-selection strategy
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RouteAdvisor: Send + Sync {
    async fn suggest(
        &self,
        asset: &AssetRef,
        amount: u128,
        context: &RouteContext,
    ) -> Result<RouteRecommendation, RouteError>;
}

/// Static mapping by asset class
#[derive(Debug, Clone)]
pub struct StaticRouteAdvisor {
    asset_classes: HashMap<String, String>,
    default_venues: HashMap<String, String>,
}

impl StaticRouteAdvisor {
    pub fn new(config: &RoutesConfig) -> Self {
        Self {
            asset_classes: config.asset_classes.clone(),
            default_venues: config.default_venues.clone(),
        }
    }

    /// Never fails: unknown assets settle as the same symbol
    pub fn recommend(&self, asset: &AssetRef) -> RouteRecommendation {
        let class = self.asset_classes.get(asset.as_str());
        let venue = class.and_then(|c| self.default_venues.get(c));

        match (class, venue) {
            (Some(class), Some(venue)) => RouteRecommendation {
                destination_venue: AssetRef::new(venue.as_str()),
                rationale: format!("default venue for asset class {}", class),
                estimated_cost: 0,
                fallback: true,
            },
            _ => RouteRecommendation {
                destination_venue: asset.clone(),
                rationale: "no class mapping, same asset".to_string(),
                estimated_cost: 0,
                fallback: true,
            },
        }
    }
}

#[async_trait]
impl RouteAdvisor for StaticRouteAdvisor {
    async fn suggest(
        &self,
        asset: &AssetRef,
        _amount: u128,
        _context: &RouteContext,
    ) -> Result<RouteRecommendation, RouteError> {
        Ok(self.recommend(asset))
    }
}

/// Advisor call with timeout and static fallback
pub struct RouteResolver {
    advisor: Option<Arc<dyn RouteAdvisor>>,
    fallback: StaticRouteAdvisor,
    timeout: Duration,
}

impl RouteResolver {
    pub fn new(config: &RoutesConfig, advisor: Option<Arc<dyn RouteAdvisor>>) -> Self {
        Self {
            advisor,
            fallback: StaticRouteAdvisor::new(config),
            timeout: Duration::from_millis(config.advisor_timeout_ms),
        }
    }

    pub async fn resolve(
        &self,
        asset: &AssetRef,
        amount: u128,
        context: &RouteContext,
    ) -> RouteRecommendation {
        let Some(advisor) = &self.advisor else {
            return self.fallback.recommend(asset);
        };

        match tokio::time::timeout(self.timeout, advisor.suggest(asset, amount, context)).await {
            Ok(Ok(recommendation)) => {
                debug!(
                    "Route for {} {} -> {}: {}",
                    amount, asset, context.dest_chain, recommendation.destination_venue
                );
                recommendation
            }
            Ok(Err(e)) => {
                warn!("Route advisor failed for {}: {}, using default venue", asset, e);
                crate::metrics::record_route_fallback("error");
                self.fallback.recommend(asset)
            }
            Err(_) => {
                warn!("Route advisor timed out for {}, using default venue", asset);
                crate::metrics::record_route_fallback("timeout");
                self.fallback.recommend(asset)
            }
        }
    }
}
