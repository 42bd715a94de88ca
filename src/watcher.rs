use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::importer::Importer;
use crate::report::SUFFIX;

pub const VOTE_FILE_PREFIX: &str = "tuneheaven-songs-";

/// `None` for files that are not vote files, otherwise the embedded date.
pub fn decode_file_name(file_name: &str) -> Option<Result<NaiveDate>> {
    let rest = file_name.strip_prefix(VOTE_FILE_PREFIX)?;
    let Some(date_part) = rest.strip_suffix(SUFFIX) else {
        return Some(Err(Error::InvalidFileName(format!("{file_name}: missing {SUFFIX} suffix"))));
    };
    // YYYY-MM-DD with zero-padded fields only.
    if date_part.len() != 10 {
        return Some(Err(Error::InvalidFileName(format!("{file_name}: expected YYYY-MM-DD"))));
    }

    Some(
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            .map_err(|err| Error::InvalidFileName(format!("{file_name}: {err}"))),
    )
}

/// Watches the drop directory for newly created vote files.
pub struct FileWatcher {
    dir: PathBuf,
    watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl FileWatcher {
    pub fn start(dir: &Path) -> Result<Self> {
        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = tx.send(event);
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "watching for vote files");

        Ok(Self {
            dir: dir.to_path_buf(),
            watcher,
            events,
        })
    }

    /// Hands every new vote file to the importer until `cancel` fires.
    pub async fn run(mut self, importer: Importer, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.events.recv() => event,
            };

            match event {
                Some(Ok(event)) => self.handle_event(&importer, event),
                Some(Err(err)) => warn!(error = %err, "watch error"),
                None => break,
            }
        }

        if let Err(err) = self.watcher.unwatch(&self.dir) {
            debug!(error = %err, "unwatch failed");
        }
        info!(dir = %self.dir.display(), "watcher stopped");
    }

    fn handle_event(&self, importer: &Importer, event: Event) {
        let paths = match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths,
            // Rename within the directory: paths are [from, to].
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                event.paths.into_iter().last().into_iter().collect()
            }
            _ => return,
        };

        for path in paths {
            let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            debug!(file_name, "file noticed");

            match decode_file_name(file_name) {
                None => {}
                Some(Err(err)) => warn!(error = %err, "ignoring vote file with unreadable date"),
                Some(Ok(date)) => {
                    let full_path = self.dir.join(file_name);
                    if importer.spawn_import(date, full_path.clone()) {
                        info!(path = %full_path.display(), %date, "vote import started");
                    }
                }
            }
        }
    }
}
