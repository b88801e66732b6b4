// ********* Input data structures ***********

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Display;

/// The three major divisions of the work.
///
/// The single-letter codes are chosen so that a plain lexicographic sort of
/// the character labels keeps the divisions in reading order (the third
/// division is mapped to `Z` for this reason).
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum Division {
    Inferno,
    Purgatorio,
    Paradiso,
}

impl Division {
    pub const ALL: [Division; 3] = [
        Division::Inferno,
        Division::Purgatorio,
        Division::Paradiso,
    ];

    /// Parses the two-letter code used in the transcription file names.
    pub fn from_code(code: &str) -> Option<Division> {
        match code {
            "IN" => Some(Division::Inferno),
            "PU" => Some(Division::Purgatorio),
            "PA" => Some(Division::Paradiso),
            _ => None,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            Division::Inferno => 'I',
            Division::Purgatorio => 'P',
            Division::Paradiso => 'Z',
        }
    }
}

impl Display for Division {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// A unique textual position in the work: one comparison point of the
/// matrix. The word index is positional within the verse, 0-based.
///
/// The derived ordering is over the composite key (division, canto, verse,
/// word), which is the canonical character order of the output.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct CharId {
    pub division: Division,
    pub canto: u32,
    pub verse: u32,
    pub word: u32,
}

impl CharId {
    /// Parses a label in the `I_01_117_0` form. Used to validate the keys
    /// of the editorial override table.
    pub fn parse(label: &str) -> Option<CharId> {
        let mut parts = label.split('_');
        let division = match parts.next()? {
            "I" => Division::Inferno,
            "P" => Division::Purgatorio,
            "Z" => Division::Paradiso,
            _ => return None,
        };
        let canto = parts.next()?.parse::<u32>().ok()?;
        let verse = parts.next()?.parse::<u32>().ok()?;
        let word = parts.next()?.parse::<u32>().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(CharId {
            division,
            canto,
            verse,
            word,
        })
    }
}

impl Display for CharId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{:02}_{:03}_{}",
            self.division, self.canto, self.verse, self.word
        )
    }
}

/// A named layer within a manuscript.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum Layer {
    /// The manuscript itself, with no layer suffix.
    Base,
    /// The original hand (`-orig` suffix).
    Original,
    /// A correction layer, carrying its raw tag (`c1`, `c2`, `c2-1`, ...).
    Correction(String),
}

/// A witness: a manuscript or a named layer within one, treated as a taxon
/// in the matrix.
///
/// Keeping the `(base, layer)` pair structured (instead of splitting the
/// identifier on demand) makes the fallback chain explicit and keeps layer
/// separators out of the base name.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct Witness {
    pub base: String,
    pub layer: Layer,
}

impl Witness {
    /// Parses a compound identifier such as `Ash`, `Ash-orig` or `Ash-c2`.
    /// Everything after the first separator is the layer tag.
    pub fn parse(id: &str) -> Witness {
        match id.split_once('-') {
            None => Witness {
                base: id.to_string(),
                layer: Layer::Base,
            },
            Some((base, "orig")) => Witness {
                base: base.to_string(),
                layer: Layer::Original,
            },
            Some((base, tag)) => Witness {
                base: base.to_string(),
                layer: Layer::Correction(tag.to_string()),
            },
        }
    }

    /// The identifier with `-` as layer separator, as found in the input.
    pub fn id(&self) -> String {
        match &self.layer {
            Layer::Base => self.base.clone(),
            Layer::Original => format!("{}-orig", self.base),
            Layer::Correction(tag) => format!("{}-{}", self.base, tag),
        }
    }

    /// The taxon name used in the output: all separators rendered as `_`.
    /// This is also the sort key for the canonical witness order.
    pub fn taxon(&self) -> String {
        match &self.layer {
            Layer::Base => self.base.clone(),
            Layer::Original => format!("{}_orig", self.base),
            Layer::Correction(tag) => format!("{}_{}", self.base, tag.replace('-', "_")),
        }
    }

    /// The imputation chain for a witness missing from a character, in
    /// order of preference: the bare manuscript, its original hand, its
    /// first correction layer. Only originally-attested readings are ever
    /// consulted through this chain.
    pub fn fallback_chain(&self) -> Vec<Witness> {
        vec![
            Witness {
                base: self.base.clone(),
                layer: Layer::Base,
            },
            Witness {
                base: self.base.clone(),
                layer: Layer::Original,
            },
            Witness {
                base: self.base.clone(),
                layer: Layer::Correction("c1".to_string()),
            },
        ]
    }
}

impl Ord for Witness {
    fn cmp(&self, other: &Self) -> Ordering {
        self.taxon().cmp(&other.taxon())
    }
}

impl PartialOrd for Witness {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Witness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// A normalized reading state for one character.
///
/// `Omission` and `Lacuna` are the two structural pseudo-states detected in
/// the raw input; plain missing data (a witness the fallback chain could
/// not resolve) never appears in the table and only surfaces as `?` in the
/// matrix. The derived order keeps the reserved states apart and sorts
/// readings by label, which is the symbol assignment order.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd)]
pub enum State {
    Omission,
    Lacuna,
    Reading(String),
}

/// One per-verse transcription record: for every word position, the raw
/// reading texts with the witnesses attesting them. The map is ordered so
/// that registration is deterministic whatever the on-disk key order was.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct VerseRecord {
    pub division: Division,
    pub canto: u32,
    pub verse: u32,
    pub words: Vec<BTreeMap<String, Vec<String>>>,
}

// ********* Configuration **********

/// Options for building a matrix out of a set of verse records.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct CollationOptions {
    /// The canonical base-text witness the composite witness defaults to.
    pub base_witness: String,
    /// The synthesized editorial composite witness, if any.
    pub composite_witness: Option<String>,
    /// Static exception table: character label -> raw override reading for
    /// the composite witness.
    pub overrides: BTreeMap<String, String>,
    /// Witnesses judged derivative, excluded at assembly time.
    pub descripti: Vec<String>,
    /// Omit single-state characters from the emitted matrix.
    pub drop_invariant: bool,
}

impl Default for CollationOptions {
    fn default() -> Self {
        CollationOptions {
            base_witness: "PET".to_string(),
            composite_witness: Some("LEO".to_string()),
            overrides: BTreeMap::new(),
            descripti: Vec::new(),
            drop_invariant: false,
        }
    }
}

// ******** Diagnostics *********

/// A non-fatal condition observed while building the matrix. These are
/// collected by every phase and reported once at the end of a run, so an
/// operator can audit how many imputations and conflicts occurred.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Diagnostic {
    /// The raw input claimed one witness under two different states for the
    /// same character. The first registration is kept.
    AmbiguousReading {
        witness: Witness,
        character: CharId,
        kept: State,
        discarded: State,
    },
    /// No attested reading and no fallback for this witness; encoded as
    /// missing data in the output.
    MissingData { witness: Witness, character: CharId },
    /// A character left with no states after the exclusion pass; dropped
    /// from the matrix, retained in the statistics.
    EmptyCharacter { character: CharId },
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::AmbiguousReading {
                witness,
                character,
                kept,
                discarded,
            } => write!(
                f,
                "ambiguous reading: witness {} in char {} claimed by {:?}, keeping {:?}",
                witness, character, discarded, kept
            ),
            Diagnostic::MissingData { witness, character } => {
                write!(f, "missing data: in {} char {}", witness, character)
            }
            Diagnostic::EmptyCharacter { character } => {
                write!(f, "char {} has no states left after exclusion", character)
            }
        }
    }
}

/// The collected warnings of a run.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    pub fn push(&mut self, d: Diagnostic) {
        self.entries.push(d);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Counts per kind: (ambiguous, missing, empty characters).
    pub fn counts(&self) -> (usize, usize, usize) {
        let mut ambiguous = 0;
        let mut missing = 0;
        let mut empty = 0;
        for e in self.entries.iter() {
            match e {
                Diagnostic::AmbiguousReading { .. } => ambiguous += 1,
                Diagnostic::MissingData { .. } => missing += 1,
                Diagnostic::EmptyCharacter { .. } => empty += 1,
            }
        }
        (ambiguous, missing, empty)
    }
}

/// Errors that prevent a matrix from being built.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum CollationErrors {
    /// An entity escape outside the closed catalogue. The catalogue is
    /// closed by design: unknown input is new data the normalizer has not
    /// been taught to handle.
    UnknownEscape { sequence: String, token: String },
    /// The escape catalogue itself declares the same sequence twice.
    DuplicateEscape { sequence: String },
    /// A witness with not a single resolved character: a configuration
    /// error, since its row would carry no data at all.
    EmptyWitnessRow { witness: String },
    /// No characters at all in the input.
    EmptyInput,
}

impl Error for CollationErrors {}

impl Display for CollationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollationErrors::UnknownEscape { sequence, token } => {
                write!(f, "unknown escape {:?} in reading {:?}", sequence, token)
            }
            CollationErrors::DuplicateEscape { sequence } => {
                write!(f, "duplicate escape {:?} in catalogue", sequence)
            }
            CollationErrors::EmptyWitnessRow { witness } => {
                write!(f, "witness {} has no resolved characters", witness)
            }
            CollationErrors::EmptyInput => write!(f, "no characters in input"),
        }
    }
}
