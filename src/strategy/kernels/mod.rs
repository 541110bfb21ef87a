//! Built-in strategy kernels.
//!
//! Each kernel is grounded on its matching header under
//! `examples/original_source/libs/strategy/include/veloz/strategy/`; only the
//! five named in spec.md §4.12 are implemented here — `advanced_strategies.h`'s
//! arbitrage/pairs-trading variants are out of scope per spec.md's Non-goals.

pub mod grid;
pub mod indicators;
pub mod market_making;
pub mod mean_reversion;
pub mod momentum;
pub mod trend_following;

pub use grid::GridStrategy;
pub use market_making::MarketMakingStrategy;
pub use mean_reversion::MeanReversionStrategy;
pub use momentum::MomentumStrategy;
pub use trend_following::TrendFollowingStrategy;

use super::{Strategy, StrategyConfig, StrategyFactory};

macro_rules! factory {
    ($factory_name:ident, $strategy_name:ident, $type_name:expr) => {
        #[derive(Debug, Default)]
        pub struct $factory_name;

        impl StrategyFactory for $factory_name {
            fn create(&self, config: &StrategyConfig) -> Box<dyn Strategy> {
                Box::new($strategy_name::new(config))
            }
            fn type_name(&self) -> &'static str {
                $type_name
            }
        }
    };
}

factory!(TrendFollowingFactory, TrendFollowingStrategy, "trend_following");
factory!(MeanReversionFactory, MeanReversionStrategy, "mean_reversion");
factory!(MomentumFactory, MomentumStrategy, "momentum");
factory!(MarketMakingFactory, MarketMakingStrategy, "market_making");
factory!(GridFactory, GridStrategy, "grid");

/// Registers all five built-in kernels with a host.
pub fn register_builtin_kernels(host: &super::host::StrategyHost) {
    host.register_factory(Box::new(TrendFollowingFactory));
    host.register_factory(Box::new(MeanReversionFactory));
    host.register_factory(Box::new(MomentumFactory));
    host.register_factory(Box::new(MarketMakingFactory));
    host.register_factory(Box::new(GridFactory));
}
