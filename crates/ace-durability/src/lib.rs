//! Durability layer for the ace code-health engine.
//!
//! Four pieces: the atomic write primitive every persistent store uses, the
//! content-addressed blob store holding full pre-images, the fsync-ordered
//! JSONL journal with its revert and crash-recovery resolvers, and receipt
//! persistence.

pub mod atomic;
pub mod blobs;
pub mod journal;
pub mod receipts;

pub use atomic::{atomic_write, read_json_store, write_json_store};
pub use blobs::BlobStore;
pub use journal::{
    IntentEntry, Journal, JournalEntry, PRE_IMAGE_PREVIEW_BYTES, REASON_CRASH_ORPHAN,
    REASON_MANUAL, RecoveryReport, RevertContext, RevertEntry, RevertReport, SuccessEntry,
    build_revert_plan, pre_image_preview, read_entries, recover_run, revert_run,
};
pub use receipts::ReceiptStore;
