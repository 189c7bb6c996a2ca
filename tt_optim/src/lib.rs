//! ABOUTME: Adaptive pool optimization from observed metrics
//! ABOUTME: Prioritized strategies, pure application, cooldown-gated commit

pub mod optimizer;
pub mod strategy;

pub use optimizer::{OptimizationResult, OptimizerConfig, PoolOptimizer};
pub use strategy::{
    aggregate, apply_strategy, default_strategies, AdjustOp, Adjustment, OptimizationStrategy,
    PoolField, TriggerConditions, WindowAggregates,
};
