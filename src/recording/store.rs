//! Recording session persistence (C2): load/save the JSON wire format.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;
use tracing::info;

use crate::fingerprint::sanitize_filename;
use crate::{OuliError, Result};

use super::types::{Recording, RecordingSession};

/// File stems longer than this are truncated and given a hash suffix.
const MAX_STEM_LEN: usize = 150;

/// The on-disk file name for a session id: `/`-flattened, sanitized, with
/// a `.mock.json` suffix. Overlong ids are truncated with an 8-hex
/// shake256 suffix appended so distinct long ids never collide.
#[must_use]
pub fn session_file_name(id: &str) -> String {
    let flattened = id.replace('/', "__");
    let sanitized = sanitize_filename(&flattened);

    if sanitized.len() <= MAX_STEM_LEN {
        return format!("{sanitized}.mock.json");
    }

    let mut hasher = Shake256::default();
    hasher.update(sanitized.as_bytes());
    let mut reader = hasher.finalize_xof();
    let mut digest = [0u8; 4];
    reader.read(&mut digest);

    let truncated = &sanitized[..MAX_STEM_LEN];
    format!("{truncated}_{}.mock.json", hex::encode(digest))
}

/// Load a recording session by id from `dir`. Returns the session exactly
/// as stored, with no renumbering.
///
/// # Errors
///
/// Returns [`OuliError::FileNotFound`] if the file doesn't exist, or
/// [`OuliError::ReplayCorruptFile`] if it can't be parsed.
pub fn load(dir: &Path, id: &str) -> Result<RecordingSession> {
    load_path(&dir.join(session_file_name(id)))
}

/// Load a recording session from an exact file path.
///
/// # Errors
///
/// Same as [`load`].
pub fn load_path(path: &Path) -> Result<RecordingSession> {
    let data = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            OuliError::FileNotFound(path.display().to_string())
        } else {
            OuliError::Io(e)
        }
    })?;

    serde_json::from_str(&data)
        .map_err(|e| OuliError::ReplayCorruptFile(format!("{}: {e}", path.display())))
}

/// Persist a recording session to `dir`, assigning `sequence` to every
/// recording and dropping any exchange that never received a response.
/// Writes are atomic (write to a temp file, then rename).
///
/// # Errors
///
/// Returns an error if the directory can't be created or the write/rename
/// fails.
pub fn save(dir: &Path, session: &mut RecordingSession) -> Result<PathBuf> {
    session.recordings.retain(|r| r.response.is_some());
    assign_sequences(&mut session.recordings);

    fs::create_dir_all(dir)?;
    let path = dir.join(session_file_name(&session.id));

    let json = serde_json::to_string_pretty(session)
        .map_err(|e| OuliError::InvalidFormat(e.to_string()))?;

    let tmp_name = format!(
        "{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    );
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, &path)?;

    info!(
        "persisted session '{}' ({} recordings, {} websocket recordings) to {}",
        session.id,
        session.recordings.len(),
        session.websocket_recordings.len(),
        path.display()
    );

    Ok(path)
}

/// Assign `sequence` to each recording: its rank, in `recording_id` order,
/// among recordings sharing the same `key`.
fn assign_sequences(recordings: &mut [Recording]) {
    let mut order: Vec<usize> = (0..recordings.len()).collect();
    order.sort_by_key(|&i| recordings[i].recording_id);

    let mut counters: HashMap<String, u64> = HashMap::new();
    for idx in order {
        let key = recordings[idx].key.clone();
        let seq = counters.entry(key).or_insert(0);
        recordings[idx].sequence = Some(*seq);
        *seq += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::types::{headers_from_pairs, RecordedRequest, RecordedResponse};
    use chrono::Utc;
    use tempfile::TempDir;

    fn sample_recording(recording_id: u64, key: &str) -> Recording {
        Recording {
            request: RecordedRequest {
                method: "GET".to_string(),
                url: "/api/posts".to_string(),
                headers: headers_from_pairs(Vec::new()),
                body: None,
            },
            response: Some(RecordedResponse {
                status_code: 200,
                headers: headers_from_pairs(Vec::new()),
                body: Some("ok".to_string()),
            }),
            timestamp: Utc::now(),
            key: key.to_string(),
            recording_id,
            sequence: None,
        }
    }

    #[test]
    fn file_name_is_flattened_and_sanitized() {
        let name = session_file_name("suite/case one");
        assert!(!name.contains('/'));
        assert!(name.ends_with(".mock.json"));
    }

    #[test]
    fn overlong_id_gets_hash_suffix() {
        let long_id = "x".repeat(300);
        let name = session_file_name(&long_id);
        assert!(name.len() < long_id.len());
        assert!(name.ends_with(".mock.json"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut session = RecordingSession::new("roundtrip");
        session.recordings.push(sample_recording(0, "GET_api_posts.json"));

        save(dir.path(), &mut session).unwrap();
        let loaded = load(dir.path(), "roundtrip").unwrap();

        assert_eq!(loaded.id, "roundtrip");
        assert_eq!(loaded.recordings.len(), 1);
        assert_eq!(loaded.recordings[0].sequence, Some(0));
    }

    #[test]
    fn responseless_recordings_are_dropped() {
        let dir = TempDir::new().unwrap();
        let mut session = RecordingSession::new("drop-me");
        let mut incomplete = sample_recording(0, "GET_api_posts.json");
        incomplete.response = None;
        session.recordings.push(incomplete);

        save(dir.path(), &mut session).unwrap();
        let loaded = load(dir.path(), "drop-me").unwrap();
        assert!(loaded.recordings.is_empty());
    }

    #[test]
    fn sequence_assigned_per_key_group() {
        let dir = TempDir::new().unwrap();
        let mut session = RecordingSession::new("seq");
        session.recordings.push(sample_recording(0, "GET_x.json"));
        session.recordings.push(sample_recording(1, "GET_x.json"));
        session.recordings.push(sample_recording(2, "POST_x.json"));

        save(dir.path(), &mut session).unwrap();
        let loaded = load(dir.path(), "seq").unwrap();

        let get_seqs: Vec<_> = loaded
            .recordings
            .iter()
            .filter(|r| r.key == "GET_x.json")
            .map(|r| r.sequence.unwrap())
            .collect();
        assert_eq!(get_seqs, vec![0, 1]);
    }

    #[test]
    fn missing_file_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let err = load(dir.path(), "nope").unwrap_err();
        assert!(matches!(err, OuliError::FileNotFound(_)));
    }

    #[test]
    fn corrupt_file_reports_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(session_file_name("broken"));
        fs::write(&path, "not json").unwrap();
        let err = load(dir.path(), "broken").unwrap_err();
        assert!(matches!(err, OuliError::ReplayCorruptFile(_)));
    }
}
