// Circulation Reconciliation - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod config;
pub mod rates;          // Rate catalog: rate id → publication
pub mod vacation;       // Vacation holds: subscriber → intervals
pub mod delivery;       // Route token → delivery channel
pub mod aggregate;      // Per-publication circulation metrics
pub mod market;         // Market rates per publication + length
pub mod audit;          // Rate ids missing from the rate export
pub mod parser;
pub mod db;
pub mod reconciliation;

// Re-export commonly used types
pub use error::{ConfigError, ExportError, RowError};
pub use config::{ColumnConfig, FileConfig, Publication, ReconConfig};
pub use rates::{LengthUnit, RateCatalog, RateEntry, RateRecord};
pub use vacation::{VacationIndex, VacationInterval, VacationPolicy, VacationRecord};
pub use delivery::{ChannelClassifier, DeliveryChannel, DeliveryClassifier};
pub use aggregate::{
    AggregationResult, EditionMetrics, RateShare, SkipCounts, Subscription,
    SubscriptionAggregator,
};
pub use market::{annualize, normalize_length, MarketRateCalculator, MarketRateEntry, MarketRateTable};
pub use audit::{MissingRate, RateAudit};
pub use parser::{
    ExportParser, ParsedExport, RateExportParser, SubscriptionExportParser, VacationExportParser,
};
pub use db::{
    ImportLogEntry, RateDistributionRow, SnapshotRow, SnapshotWrite,
    setup_database, write_snapshot, insert_import_log,
    get_snapshots_for_date, get_rate_distribution, get_market_rates, get_import_log,
    latest_snapshot_date, count_snapshots,
};
pub use reconciliation::{
    CirculationTotals, ExportSet, InputHashes, InputStats, ReconciliationEngine,
    ReconciliationReport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
