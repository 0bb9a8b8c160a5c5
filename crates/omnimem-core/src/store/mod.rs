//! Storage engine - the triplicated, integrity-checked record store.
//!
//! Three projections of every record: markdown body (human-readable), event
//! log (durable ordering authority), indexed relational view (queries + FTS).

mod core_blocks;
mod event_log;
mod index;
mod ingest;
mod markdown;
mod schema;

pub use core_blocks::{CoreBlock, CoreBlockInput, CoreBlockOutcome};
pub use event_log::{append_event, event_file_path, list_event_files, Event, ParsedLine};
pub use index::{
    Brief, BriefItem, MemoryRecord, MemoryStore, PruneOptions, PruneReport, ReindexReport,
    VerifyReport, WriteInput, WriteOutcome,
};
pub use ingest::{ChunkMode, IngestInput, IngestReport, SourceType};
pub use markdown::{md_rel_path, read_markdown, write_markdown};
