pub mod ad_lock;
pub mod budget;
pub mod device;
pub mod eligibility;
pub mod metrics;
pub mod tracker;
