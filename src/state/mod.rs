pub mod baseline_store;
pub mod policy_store;
pub mod result_cache;

pub use baseline_store::{BaselineSettings, RefreshReport, VolumeBaselineStore};
pub use policy_store::PolicyStore;
pub use result_cache::ResultCache;
