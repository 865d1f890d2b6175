//! Append-only run journal.
//!
//! Every lifecycle transition of a (kernel, parameters) key is appended as a
//! `<key>\t<integer>` line and synced before the caller proceeds, so a
//! process that dies inside a risky call leaves its last checkpoint on disk.
//! Replaying the file gives the next process the latest state per key plus
//! every recorded timing.

use crate::error::JournalError;
use crate::key::JournalKey;
use crate::state::{Checkpoint, JournalEntry, RunState};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Record {
    state: RunState,
    timings: Vec<u64>,
}

impl Record {
    fn new() -> Self {
        Self {
            state: RunState::Missing,
            timings: Vec::new(),
        }
    }

    fn is_bad(&self) -> bool {
        self.state != RunState::RunOk
    }
}

#[derive(Debug, Default)]
pub struct RunJournal {
    path: Option<PathBuf>,
    records: HashMap<JournalKey, Record>,
    order: Vec<JournalKey>,
}

impl RunJournal {
    /// Journal without backing storage; appends only update memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Replay the journal at `path`. A missing file is an empty journal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let mut journal = Self {
            path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        };
        journal.reload()?;
        Ok(journal)
    }

    /// Drop in-memory state and replay the backing file again.
    pub fn reload(&mut self) -> Result<(), JournalError> {
        self.records.clear();
        self.order.clear();
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let text = fs::read_to_string(&path).map_err(|e| JournalError::io(&path, e))?;
        // Anything after the last newline is a torn write from a process
        // killed mid-append, even when it happens to parse.
        let body_len = text.rfind('\n').map_or(0, |idx| idx + 1);
        for (idx, line) in text[..body_len].lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Some((key, entry)) if self.accepts(&key, entry) => self.apply(key, entry),
                _ => {
                    return Err(JournalError::Malformed {
                        path,
                        line: idx + 1,
                        content: line.to_string(),
                    })
                }
            }
        }
        if body_len < text.len() {
            warn!(
                path = %path.display(),
                tail = &text[body_len..],
                "dropping truncated journal tail"
            );
            truncate(&path, body_len as u64).map_err(|e| JournalError::io(&path, e))?;
        }

        debug!(
            path = %path.display(),
            keys = self.order.len(),
            good = self.memo_good(),
            "journal replayed"
        );
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// `Missing` when the key was never recorded.
    pub fn query_state(&self, key: &JournalKey) -> RunState {
        self.records
            .get(key)
            .map(|record| record.state)
            .unwrap_or(RunState::Missing)
    }

    /// Timing recorded for `trial`, if that trial ever ran.
    pub fn query_time(&self, key: &JournalKey, trial: usize) -> Option<u64> {
        self.records
            .get(key)
            .and_then(|record| record.timings.get(trial).copied())
    }

    pub fn timings(&self, key: &JournalKey) -> &[u64] {
        self.records
            .get(key)
            .map(|record| record.timings.as_slice())
            .unwrap_or(&[])
    }

    /// Durably append one record, then apply it in memory.
    ///
    /// The in-memory view is updated even when the write fails, so the
    /// running process stays consistent; only crash resilience for this
    /// record is lost.
    pub fn append(&mut self, key: &JournalKey, entry: JournalEntry) -> Result<(), JournalError> {
        if !key.is_writable() {
            return Err(JournalError::InvalidKey(key.to_string()));
        }
        self.apply(key.clone(), entry);

        let Some(path) = &self.path else {
            return Ok(());
        };
        let line = format!("{}\t{}\n", key, entry.encode());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| JournalError::io(path, e))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| JournalError::io(path, e))
    }

    /// Rewrite the journal keeping only the last lifecycle record per key,
    /// plus (unless `drop_timings`) the timings of keys that reached
    /// `RunOk`. Returns `memo_bad`, the keys whose last state is not `RunOk`.
    ///
    /// No other process may read or append while this runs.
    pub fn compact(&mut self, drop_timings: bool) -> Result<usize, JournalError> {
        let bad = self.memo_bad();
        for record in self.records.values_mut() {
            if record.is_bad() {
                record.timings.clear();
            } else if drop_timings {
                record.timings.clear();
            }
        }

        if let Some(path) = &self.path {
            let staging = path.with_extension("compacting");
            self.write_snapshot(&staging)
                .map_err(|e| JournalError::io(&staging, e))?;
            fs::rename(&staging, path).map_err(|e| JournalError::io(path, e))?;
            debug!(path = %path.display(), keys = self.order.len(), bad, "journal compacted");
        }
        Ok(bad)
    }

    /// Keys with at least one recorded timing.
    pub fn memo_good(&self) -> usize {
        self.records
            .values()
            .filter(|record| !record.timings.is_empty())
            .count()
    }

    /// Keys whose last state is not `RunOk`; the count `compact` returns.
    ///
    /// A key measured in an earlier round that then crashed counts here and
    /// in `memo_good`.
    pub fn memo_bad(&self) -> usize {
        self.records.values().filter(|record| record.is_bad()).count()
    }

    /// Keys whose last record is a `*_IN_PROGRESS` checkpoint, in first-seen
    /// order.
    pub fn dangling_keys(&self) -> Vec<(&JournalKey, RunState)> {
        self.order
            .iter()
            .filter_map(|key| {
                let state = self.records.get(key)?.state;
                state.is_dangling().then_some((key, state))
            })
            .collect()
    }

    /// Keys in first-seen order.
    pub fn keys(&self) -> impl Iterator<Item = &JournalKey> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Timings only follow a `RunOk` checkpoint for the same key.
    fn accepts(&self, key: &JournalKey, entry: JournalEntry) -> bool {
        match entry {
            JournalEntry::Checkpoint(_) => true,
            JournalEntry::Elapsed(_) => self.query_state(key) == RunState::RunOk,
        }
    }

    fn apply(&mut self, key: JournalKey, entry: JournalEntry) {
        if !self.records.contains_key(&key) {
            self.order.push(key.clone());
        }
        let record = self.records.entry(key).or_insert_with(Record::new);
        match entry {
            JournalEntry::Checkpoint(checkpoint) => record.state = checkpoint.into(),
            JournalEntry::Elapsed(micros) => record.timings.push(micros),
        }
    }

    fn write_snapshot(&self, path: &Path) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for key in &self.order {
            let Some(record) = self.records.get(key) else {
                continue;
            };
            let Some(checkpoint) = record.state.checkpoint() else {
                continue;
            };
            writeln!(writer, "{}\t{}", key, checkpoint.sentinel())?;
            if checkpoint == Checkpoint::RunOk {
                for micros in &record.timings {
                    writeln!(writer, "{}\t{}", key, JournalEntry::Elapsed(*micros).encode())?;
                }
            }
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }
}

/// Cut the file back to its last complete record so the next append
/// starts on a fresh line.
fn truncate(path: &Path, len: u64) -> std::io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()
}

fn parse_line(line: &str) -> Option<(JournalKey, JournalEntry)> {
    let (key, value) = line.rsplit_once('\t')?;
    let entry = JournalEntry::decode(value.trim().parse().ok()?)?;
    let key = JournalKey::from_raw(key);
    key.is_writable().then_some((key, entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn journal_in(dir: &TempDir) -> RunJournal {
        RunJournal::load(dir.path().join("tune.journal")).unwrap()
    }

    fn record_success(journal: &mut RunJournal, key: &JournalKey, micros: u64) {
        for checkpoint in [
            Checkpoint::BuildInProgress,
            Checkpoint::BuildOk,
            Checkpoint::RunInProgress,
            Checkpoint::RunOk,
        ] {
            journal
                .append(key, JournalEntry::Checkpoint(checkpoint))
                .unwrap();
        }
        journal.append(key, JournalEntry::Elapsed(micros)).unwrap();
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir);
        assert!(journal.is_empty());
        let key = JournalKey::new("k", &[1]);
        assert_eq!(journal.query_state(&key), RunState::Missing);
        assert_eq!(journal.query_time(&key, 0), None);
    }

    #[test]
    fn replay_reproduces_queries() {
        let dir = TempDir::new().unwrap();
        let good = JournalKey::new("k", &[1, 2]);
        let crashed = JournalKey::new("k", &[3, 4]);
        {
            let mut journal = journal_in(&dir);
            record_success(&mut journal, &good, 120);
            record_success(&mut journal, &good, 110);
            journal
                .append(&crashed, JournalEntry::Checkpoint(Checkpoint::BuildInProgress))
                .unwrap();
            journal
                .append(&crashed, JournalEntry::Checkpoint(Checkpoint::BuildOk))
                .unwrap();
            journal
                .append(&crashed, JournalEntry::Checkpoint(Checkpoint::RunInProgress))
                .unwrap();
        }

        let journal = journal_in(&dir);
        assert_eq!(journal.query_state(&good), RunState::RunOk);
        assert_eq!(journal.query_time(&good, 0), Some(120));
        assert_eq!(journal.query_time(&good, 1), Some(110));
        assert_eq!(journal.query_time(&good, 2), None);
        assert_eq!(journal.query_state(&crashed), RunState::RunInProgress);
        assert_eq!(journal.memo_good(), 1);
        assert_eq!(journal.memo_bad(), 1);
        assert_eq!(
            journal.dangling_keys(),
            vec![(&crashed, RunState::RunInProgress)]
        );
    }

    #[test]
    fn build_in_progress_alone_is_bad() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tune.journal");
        fs::write(&path, "key1\t-1\n").unwrap();

        let journal = RunJournal::load(&path).unwrap();
        let key = JournalKey::from_raw("key1");
        assert_eq!(journal.query_state(&key), RunState::BuildInProgress);
        assert_eq!(journal.memo_good(), 0);
        assert!(journal.query_state(&key).is_known_bad());
    }

    #[test]
    fn crash_after_a_measured_round_counts_as_bad() {
        let dir = TempDir::new().unwrap();
        let key = JournalKey::new("k", &[5]);
        let mut journal = journal_in(&dir);
        record_success(&mut journal, &key, 40);
        journal
            .append(&key, JournalEntry::Checkpoint(Checkpoint::BuildInProgress))
            .unwrap();

        assert_eq!(journal.memo_good(), 1);
        assert_eq!(journal.memo_bad(), 1);
        assert_eq!(journal.compact(false).unwrap(), journal.memo_bad());
        assert_eq!(journal.memo_good(), 0);
    }

    #[test]
    fn truncated_tail_is_ignored_but_corruption_is_not() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tune.journal");

        fs::write(&path, "a(1)\t-1\na(1)\t-2\na(1)\t-").unwrap();
        let journal = RunJournal::load(&path).unwrap();
        assert_eq!(
            journal.query_state(&JournalKey::from_raw("a(1)")),
            RunState::BuildOk
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "a(1)\t-1\na(1)\t-2\n");

        fs::write(&path, "a(1)\t-1\ngarbage\na(1)\t-2\n").unwrap();
        let err = RunJournal::load(&path).unwrap_err();
        assert!(matches!(err, JournalError::Malformed { line: 2, .. }));

        fs::write(&path, "a(1)\t-1\na(1)\t250\n").unwrap();
        assert!(RunJournal::load(&path).is_err(), "timing without RUN_OK");
    }

    #[test]
    fn append_after_torn_tail_stays_loadable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tune.journal");
        fs::write(&path, "a(1)\t-1\na(1)\t-").unwrap();

        let mut journal = RunJournal::load(&path).unwrap();
        let next = JournalKey::from_raw("b(2)");
        journal
            .append(&next, JournalEntry::Checkpoint(Checkpoint::BuildInProgress))
            .unwrap();

        let journal = RunJournal::load(&path).unwrap();
        assert_eq!(
            journal.query_state(&JournalKey::from_raw("a(1)")),
            RunState::BuildInProgress
        );
        assert_eq!(journal.query_state(&next), RunState::BuildInProgress);
        assert_eq!(fs::read_to_string(&path).unwrap(), "a(1)\t-1\nb(2)\t-1\n");
    }

    #[test]
    fn parsable_torn_tail_is_not_trusted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tune.journal");
        // `a(1)\t250` cut short while being written.
        fs::write(&path, "a(1)\t-1\na(1)\t-2\na(1)\t-3\na(1)\t-4\na(1)\t25").unwrap();

        let journal = RunJournal::load(&path).unwrap();
        let key = JournalKey::from_raw("a(1)");
        assert_eq!(journal.query_state(&key), RunState::RunOk);
        assert!(journal.timings(&key).is_empty());
        assert_eq!(journal.memo_good(), 0);
    }

    #[test]
    fn append_rejects_unwritable_keys() {
        let mut journal = RunJournal::in_memory();
        let key = JournalKey::new("bad\tname", &[1]);
        let err = journal
            .append(&key, JournalEntry::Checkpoint(Checkpoint::BuildInProgress))
            .unwrap_err();
        assert!(matches!(err, JournalError::InvalidKey(_)));
        assert!(journal.is_empty());
    }

    #[test]
    fn append_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut journal = RunJournal::load(dir.path().join("missing-dir").join("j")).unwrap();
        let key = JournalKey::new("k", &[1]);
        let result = journal.append(&key, JournalEntry::Checkpoint(Checkpoint::BuildInProgress));
        assert!(matches!(result, Err(JournalError::Io { .. })));
        assert_eq!(journal.query_state(&key), RunState::BuildInProgress);
    }

    #[test]
    fn compact_keeps_last_state_and_good_timings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tune.journal");
        let good = JournalKey::new("k", &[1]);
        let flaky = JournalKey::new("k", &[2]);
        let broken = JournalKey::new("k", &[3]);
        {
            let mut journal = RunJournal::load(&path).unwrap();
            record_success(&mut journal, &good, 90);
            record_success(&mut journal, &good, 80);
            record_success(&mut journal, &flaky, 70);
            journal
                .append(&flaky, JournalEntry::Checkpoint(Checkpoint::BuildInProgress))
                .unwrap();
            journal
                .append(&broken, JournalEntry::Checkpoint(Checkpoint::BuildInProgress))
                .unwrap();
            journal
                .append(&broken, JournalEntry::Checkpoint(Checkpoint::BuildOk))
                .unwrap();
            assert_eq!(journal.compact(false).unwrap(), 2);
        }

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "k(1)\t-4\nk(1)\t90\nk(1)\t80\nk(2)\t-1\nk(3)\t-2\n"
        );

        let mut journal = RunJournal::load(&path).unwrap();
        assert_eq!(journal.timings(&good), &[90, 80]);
        assert_eq!(journal.query_state(&flaky), RunState::BuildInProgress);
        assert_eq!(journal.query_time(&flaky, 0), None);

        assert_eq!(journal.compact(true).unwrap(), 2);
        let journal = RunJournal::load(&path).unwrap();
        assert_eq!(journal.query_state(&good), RunState::RunOk);
        assert!(journal.timings(&good).is_empty());
        assert_eq!(journal.len(), 3);
    }
}
