// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod index;
mod store;
mod tool_results;
mod types;

pub use index::DialogIndex;
pub use store::DialogStore;
pub use tool_results::ToolResultStore;
pub use types::{
    new_dialog_id, DialogMeta, FileEditRecord, HistoryPage, MessageKind, MessageRecord,
    ToolResultMeta,
};
