//! Lattice core: entity model, delta analysis, content tracking, metrics

pub mod config;
pub mod delta;
pub mod error;
pub mod events;
pub mod metrics;
pub mod model;
pub mod parse;
pub mod tracker;


pub use config::{
    is_skipped_dir, is_supported_path, is_under_skipped_dir, EngineConfig, SKIP_DIRECTORIES,
    SUPPORTED_EXTENSIONS,
};
pub use delta::{DeltaAnalyzer, EntityDelta, KindDelta};
pub use error::{ParseError, SinkError};
pub use events::{ChangeEvent, ChangeKind, SyncEvent, SyncEventKind};
pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use model::{
    ClassEntity, ConstantEntity, CssRuleEntity, EntityIdentity, ExtendsEntity, FunctionCallEntity,
    FunctionEntity, ImplementsEntity, ImportEntity, InterfaceEntity, JsxElementEntity, ParsedFile,
    ReferenceEntity, SourceLanguage, TypeEntity, TypeUsageEntity, VariableEntity,
};
pub use parse::SourceParser;
pub use tracker::{ChangeStatus, FileState, FileTracker, STATE_FILE};
