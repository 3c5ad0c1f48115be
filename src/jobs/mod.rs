pub mod budget_sweeper;
pub mod side_effects;
