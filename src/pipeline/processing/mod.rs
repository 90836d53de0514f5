// Pipeline processing: table extraction, validation, and transformation

pub mod extractor;
pub mod quality_gate;
pub mod transform;

pub use extractor::{SchemaIssue, SchemaReport, TableExtractor};
pub use quality_gate::{DataQualityValidator, RowError, RowErrorKind, SeasonWarning, ValidationOutcome};
pub use transform::{DefenseMultiplierTransformer, SeasonMultipliers, SkippedTeam};
