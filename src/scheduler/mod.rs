pub mod host;
pub mod matrix;
pub mod overrides;
pub mod queue;

pub use host::{HostRecord, HostRegistry};
pub use matrix::{Entry, MatrixBuilder, Row};
pub use overrides::{OverrideLedger, OverrideRecord, QueueSet};
pub use queue::{Queue, QueueWeightSource, StaticWeights, StoredWeights};
