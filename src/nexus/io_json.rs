// Reading of the per-verse transcription files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use snafu::prelude::*;

use collation_matrix::{Division, VerseRecord};

use crate::nexus::*;

/// Discovers and parses every `*.json` file of the transcription
/// directory. Files are sorted by name before the optional cap is applied,
/// so the on-disk discovery order never affects the output.
pub fn read_transcriptions(dir: &str, max_files: Option<usize>) -> NexusResult<Vec<VerseRecord>> {
    let entries = fs::read_dir(dir).context(ReadingDirSnafu { path: dir })?;
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.context(ReadingDirSnafu { path: dir })?;
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            paths.push(path);
        }
    }
    paths.sort();
    if let Some(max) = max_files {
        paths.truncate(max);
    }

    let mut records: Vec<VerseRecord> = Vec::new();
    for path in paths.iter() {
        records.push(read_verse_file(path)?);
    }
    Ok(records)
}

/// Parses one verse file: a list of per-word objects mapping the raw
/// reading text to the witnesses attesting it. A structural violation is
/// fatal for the run, since a silently skipped record would corrupt the
/// matrix.
fn read_verse_file(path: &Path) -> NexusResult<VerseRecord> {
    let p = path.display().to_string();
    let (division, canto, verse) = parse_file_name(path)?;
    debug!("Parsing {}...", p);
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path: p.clone() })?;
    let words: Vec<BTreeMap<String, Vec<String>>> =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path: p })?;
    Ok(VerseRecord {
        division,
        canto,
        verse,
        words,
    })
}

// File names carry the position of the verse: `<DIV>_<canto>_<verse>.json`,
// e.g. `IN_01_117.json`.
fn parse_file_name(path: &Path) -> NexusResult<(Division, u32, u32)> {
    let p = path.display().to_string();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .context(BadFileNameSnafu { path: p.clone() })?;
    let fields: Vec<&str> = stem.split('_').collect();
    let (code, canto_s, verse_s) = match fields.as_slice() {
        [a, b, c] => (*a, *b, *c),
        _ => return BadFileNameSnafu { path: p }.fail(),
    };
    let division = Division::from_code(code).context(UnknownDivisionSnafu {
        code,
        path: p.clone(),
    })?;
    let canto = canto_s
        .parse::<u32>()
        .ok()
        .context(BadFileNameSnafu { path: p.clone() })?;
    let verse = verse_s
        .parse::<u32>()
        .ok()
        .context(BadFileNameSnafu { path: p })?;
    Ok((division, canto, verse))
}

#[cfg(test)]
mod tests {
    use super::parse_file_name;
    use collation_matrix::Division;
    use std::path::Path;

    #[test]
    fn file_names() {
        let (division, canto, verse) =
            parse_file_name(Path::new("data/transcription/IN_01_117.json")).unwrap();
        assert_eq!(division, Division::Inferno);
        assert_eq!(canto, 1);
        assert_eq!(verse, 117);

        let (division, _, _) = parse_file_name(Path::new("PA_33_145.json")).unwrap();
        assert_eq!(division, Division::Paradiso);

        assert!(parse_file_name(Path::new("IN_01.json")).is_err());
        assert!(parse_file_name(Path::new("XX_01_001.json")).is_err());
    }
}
