//! Routing table: which upstream source, endpoint, and symbol spelling serve a
//! given market and dataset kind.

use std::collections::HashMap;
use std::sync::Arc;

use super::provider::UpstreamSource;
use super::schema::DatasetKind;
use crate::domain::{Market, SymbolFormat};

#[derive(Clone)]
pub struct Route {
    pub source: Arc<dyn UpstreamSource>,
    pub endpoint: String,
    pub symbol_format: SymbolFormat,
}

#[derive(Clone)]
pub struct AggregateRoute {
    pub prefix: String,
    pub kind: DatasetKind,
    pub source: Arc<dyn UpstreamSource>,
    pub endpoint: String,
}

#[derive(Clone, Default)]
pub struct SourceRouter {
    timeseries: HashMap<(Market, DatasetKind), Route>,
    aggregates: Vec<AggregateRoute>,
}

impl SourceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the route for a market/kind pair.
    pub fn route(
        mut self,
        market: Market,
        kind: DatasetKind,
        source: Arc<dyn UpstreamSource>,
        endpoint: impl Into<String>,
        symbol_format: SymbolFormat,
    ) -> Self {
        self.timeseries.insert(
            (market, kind),
            Route {
                source,
                endpoint: endpoint.into(),
                symbol_format,
            },
        );
        self
    }

    /// Register an aggregate route for dataset keys starting with `prefix`.
    /// Earlier registrations win when prefixes overlap.
    pub fn aggregate(
        mut self,
        prefix: impl Into<String>,
        kind: DatasetKind,
        source: Arc<dyn UpstreamSource>,
        endpoint: impl Into<String>,
    ) -> Self {
        self.aggregates.push(AggregateRoute {
            prefix: prefix.into(),
            kind,
            source,
            endpoint: endpoint.into(),
        });
        self
    }

    pub fn timeseries_route(&self, market: Market, kind: DatasetKind) -> Option<&Route> {
        self.timeseries.get(&(market, kind))
    }

    pub fn aggregate_route(&self, dataset_key: &str) -> Option<&AggregateRoute> {
        self.aggregates
            .iter()
            .find(|r| dataset_key.starts_with(&r.prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::{DataError, FetchRequest};
    use crate::data::table::Table;

    struct Named(&'static str);

    impl UpstreamSource for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn fetch(&self, _request: &FetchRequest) -> Result<Table, DataError> {
            Ok(Table::default())
        }
    }

    #[test]
    fn routes_by_market_and_prefix() {
        let router = SourceRouter::new()
            .route(
                Market::Cn,
                DatasetKind::PriceHistory,
                Arc::new(Named("cn")),
                "hist",
                SymbolFormat::LowerPrefixed,
            )
            .aggregate("industry:", DatasetKind::IndustryPe, Arc::new(Named("agg")), "industry_pe")
            .aggregate("industry:", DatasetKind::IndustryRoe, Arc::new(Named("shadowed")), "roe");

        let route = router
            .timeseries_route(Market::Cn, DatasetKind::PriceHistory)
            .unwrap();
        assert_eq!(route.source.name(), "cn");
        assert!(router
            .timeseries_route(Market::Hk, DatasetKind::PriceHistory)
            .is_none());

        let agg = router.aggregate_route("industry:semiconductors").unwrap();
        assert_eq!(agg.source.name(), "agg");
        assert!(router.aggregate_route("macro:cpi").is_none());
    }
}
