//! Filesystem event handler for the notify watcher (hot-reload).

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind};
use tracing::debug;

use crate::error::LoadStatus;
use crate::loader::{is_rule_file, FileIndex};

/// Handle a single filesystem event from the notify watcher.
pub(crate) fn handle_fs_event(event: &Event, index: &FileIndex) {
    for path in &event.paths {
        // Skips dotfiles too, including editor swap files.
        if !is_rule_file(path) {
            continue;
        }

        match &event.kind {
            EventKind::Create(CreateKind::File)
            | EventKind::Create(CreateKind::Any)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Name(_)) => {
                // A rename reports the old path as well; it no longer exists.
                if !path.exists() {
                    index.forget_file(path);
                    continue;
                }
                if let LoadStatus::Loaded { rule_ids } = index.apply_file(path) {
                    debug!(path = %path.display(), rules = rule_ids.len(), "hot-reloaded rule file");
                }
            }
            EventKind::Remove(RemoveKind::File) | EventKind::Remove(RemoveKind::Any) => {
                index.forget_file(path);
            }
            _ => {}
        }
    }
}
