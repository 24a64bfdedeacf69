pub mod pipeline;
pub mod runtime;
pub mod source;
pub mod target;

pub use pipeline::{
    BackoffStrategy, CompletionCoordinator, CompletionSignal, MigrationReport, MigrationSinks,
    Migrator, Outcome, OutcomeStatus, RetryPolicy,
};
pub use runtime::config::{MigrationConfig, MigrationConfigBuilder, MigrationConfigParams};
pub use runtime::progress::ProgressSnapshot;
pub use runtime::runner::Runner;
pub use runtime::sink::{
    DumpSink, FailureReporter, FsDumpSink, JsonLinesLedger, LogFailureReporter, MemoryFailureReporter,
    MemoryLedger, NoopDumpSink, OutcomeLedger, ReportedFailure,
};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use source::{Cursor, HttpPageSource, Page, PageSource, Record, SourceError, Totals};
pub use target::{DeviceType, HttpRegistrar, RegisterResponse, Registrar, RegistrationError};
